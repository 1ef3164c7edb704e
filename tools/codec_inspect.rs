/// Codec Inspector: decode and encode dialogue buffers offline.
///
/// Usage: codec_inspect decode <file | hex bytes>
///        codec_inspect encode <text>
///        codec_inspect tags

use dialogue_engine::core::codec;
use dialogue_engine::core::normalize;
use dialogue_engine::schema::control;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        process::exit(0);
    }

    match args[1].as_str() {
        "decode" => {
            if args.len() < 3 {
                eprintln!("ERROR: decode needs a file or hex bytes");
                process::exit(1);
            }
            let input = args[2..].join(" ");
            let bytes = match load_bytes(&input) {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    process::exit(1);
                }
            };
            let text = codec::decode(&bytes);
            println!("{}", text);
            println!("\n({} bytes in, {} visible chars)", bytes.len(), text.visible().chars().count());
        }
        "encode" => {
            if args.len() < 3 {
                eprintln!("ERROR: encode needs text");
                process::exit(1);
            }
            let input = unescape(&args[2..].join(" "));
            let canonical = normalize::canonicalize(&input);
            if canonical != input {
                println!("canonical: {}", canonical);
            }
            let bytes = codec::encode(&input);
            println!("{}", hex(&bytes));
            println!("\nreads back as:\n{}", codec::decode(&bytes));
        }
        "tags" => {
            for code in control::all() {
                println!("7F {:02X}  {:>2} arg bytes  {}", code.opcode, code.arg_len(), code.template);
            }
        }
        other => {
            eprintln!("ERROR: unknown command '{}'", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Usage: codec_inspect decode <file | hex bytes>");
    println!("       codec_inspect encode <text>   (\\n for line breaks)");
    println!("       codec_inspect tags");
}

/// A path to a raw dump, or whitespace-separated hex.
fn load_bytes(input: &str) -> Result<Vec<u8>, String> {
    let path = Path::new(input);
    if path.is_file() {
        return std::fs::read(path).map_err(|e| format!("failed to read '{}': {}", input, e));
    }
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("not a file or hex bytes: '{}' (found '{}')", input, bad));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{}'", input));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = &digits[i..i + 2];
            u8::from_str_radix(pair, 16).map_err(|_| format!("bad hex byte '{}'", pair))
        })
        .collect()
}

fn unescape(input: &str) -> String {
    input.replace("\\n", "\n")
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_input_with_spaces_loads() {
        assert_eq!(load_bytes("48 69 7f 04 00"), Ok(vec![0x48, 0x69, 0x7F, 0x04, 0x00]));
        assert_eq!(hex(&[0x48, 0x69]), "48 69");
    }

    #[test]
    fn non_hex_input_is_rejected() {
        assert!(load_bytes("ä1").is_err());
        assert!(load_bytes("zz").is_err());
        assert!(load_bytes("486").is_err());
    }

    #[test]
    fn escaped_newline_is_unescaped() {
        assert_eq!(unescape("Hi\\nthere"), "Hi\nthere");
    }
}
