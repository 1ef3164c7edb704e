/// Gossip between villagers: directed relationships that drift over time and
/// the rumor context handed to the generator.
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Rumor context for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipContext {
    pub rumor_topic: String,
    /// Other villagers worth mentioning, closest first. At most four.
    pub targets: Vec<String>,
    pub opinion: String,
}

/// Source of gossip context. All methods take `&self`; implementations are
/// shared between the poll loop and the generation worker.
pub trait Gossip: Send + Sync {
    /// Called once per poll tick with every speaker seen so far.
    fn refresh(&self, _known: &[String]) {}

    /// The player just started a chat with `speaker`.
    fn observe_interaction(&self, _speaker: &str, _known: &[String]) {}

    fn context_for(&self, speaker: &str, known: &[String]) -> Option<GossipContext>;
}

/// A typed, directional edge between two villagers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub intensity: f32,
    pub tags: FxHashSet<String>,
}

const TOPICS: &[&str] = &[
    "a fossil nobody has shown the museum yet",
    "who keeps trampling the flower beds",
    "the shop raising its prices again",
    "a mysterious visitor seen near the station",
    "the best fishing spot this week",
    "someone's secret crush",
    "a letter that never got delivered",
    "the weird noise from the well at night",
];

const MAX_TARGETS: usize = 4;
/// Largest change `spread` applies to one edge per tick.
const DRIFT: f32 = 0.05;

#[derive(Debug)]
struct MillState {
    rng: StdRng,
    edges: FxHashMap<(String, String), Relationship>,
    interactions: FxHashMap<String, u32>,
}

/// In-memory gossip model.
///
/// Every ordered pair of known villagers gets a relationship seeded at
/// random; each tick nudges every edge a little; talking to the player
/// warms the speaker's outgoing edges.
#[derive(Debug)]
pub struct RumorMill {
    state: Mutex<MillState>,
}

impl RumorMill {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(MillState {
                rng: StdRng::seed_from_u64(seed),
                edges: FxHashMap::default(),
                interactions: FxHashMap::default(),
            }),
        }
    }

    /// Add edges for any pair of `known` villagers that lacks one.
    pub fn seed_if_needed(&self, known: &[String]) {
        let mut state = self.state.lock();
        let MillState { rng, edges, .. } = &mut *state;
        for source in known {
            for target in known {
                if source == target {
                    continue;
                }
                edges
                    .entry((source.clone(), target.clone()))
                    .or_insert_with(|| Relationship {
                        source: source.clone(),
                        target: target.clone(),
                        intensity: rng.gen_range(0.1..0.9),
                        tags: FxHashSet::default(),
                    });
            }
        }
    }

    /// Drift every edge between `known` villagers by at most [`DRIFT`].
    pub fn spread(&self, known: &[String]) {
        let known: FxHashSet<&str> = known.iter().map(String::as_str).collect();
        let mut state = self.state.lock();
        let MillState { rng, edges, .. } = &mut *state;
        for rel in edges.values_mut() {
            if known.contains(rel.source.as_str()) && known.contains(rel.target.as_str()) {
                rel.intensity = (rel.intensity + rng.gen_range(-DRIFT..=DRIFT)).clamp(0.0, 1.0);
            }
        }
    }

    pub fn intensity(&self, source: &str, target: &str) -> Option<f32> {
        self.state
            .lock()
            .edges
            .get(&(source.to_string(), target.to_string()))
            .map(|rel| rel.intensity)
    }

    pub fn interactions(&self, speaker: &str) -> u32 {
        self.state.lock().interactions.get(speaker).copied().unwrap_or(0)
    }
}

impl Gossip for RumorMill {
    fn refresh(&self, known: &[String]) {
        self.seed_if_needed(known);
        self.spread(known);
    }

    fn observe_interaction(&self, speaker: &str, known: &[String]) {
        self.seed_if_needed(known);
        let mut state = self.state.lock();
        *state.interactions.entry(speaker.to_string()).or_insert(0) += 1;
        for rel in state.edges.values_mut() {
            if rel.source == speaker {
                rel.intensity = (rel.intensity + DRIFT).min(1.0);
                rel.tags.insert("chatted".to_string());
            }
        }
    }

    fn context_for(&self, speaker: &str, known: &[String]) -> Option<GossipContext> {
        if speaker.is_empty() {
            return None;
        }
        let mut state = self.state.lock();
        let mut scored: Vec<(String, f32)> = known
            .iter()
            .filter(|name| name.as_str() != speaker)
            .filter_map(|name| {
                state
                    .edges
                    .get(&(speaker.to_string(), name.clone()))
                    .map(|rel| (name.clone(), rel.intensity))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(MAX_TARGETS);

        let rumor_topic = TOPICS.choose(&mut state.rng)?.to_string();
        let opinion = match scored.first() {
            Some((_, intensity)) => opinion_for(*intensity),
            None => "curious",
        };
        Some(GossipContext {
            rumor_topic,
            targets: scored.into_iter().map(|(name, _)| name).collect(),
            opinion: opinion.to_string(),
        })
    }
}

fn opinion_for(intensity: f32) -> &'static str {
    if intensity >= 0.75 {
        "adoring"
    } else if intensity >= 0.5 {
        "friendly"
    } else if intensity >= 0.25 {
        "skeptical"
    } else {
        "grumpy"
    }
}
