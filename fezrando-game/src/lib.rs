//! Data model for the FEZ entrance randomizer: levels, doorways, the
//! collectible ledger, and the level dataset loader.

use anyhow::{bail, Context, Result};
use hashbrown::{HashMap, HashSet};
use log::warn;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_derive::Deserialize;
use std::path::Path;

pub type LevelId = usize;

/// Number of owls in a complete set.
pub const FULL_OWL_COUNT: i32 = 4;

/// Aggregate of progression resources obtainable up to some point in the
/// graph. Counters stay non-negative; the only decrement is the engine
/// consuming a key, which is checked first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Collectibles {
    pub golden_cubes: i32,
    pub anti_cubes: i32,
    pub heart_pieces: i32,
    pub bits: i32,
    pub keys: i32,
    pub owls: i32,
    pub water_lower: bool,
    pub other: String,
}

impl Collectibles {
    pub fn combine(&self, other: &Collectibles) -> Collectibles {
        let text = if self.other.is_empty() {
            other.other.clone()
        } else if other.other.is_empty() {
            self.other.clone()
        } else {
            format!("{}, {}", self.other, other.other)
        };
        Collectibles {
            golden_cubes: self.golden_cubes + other.golden_cubes,
            anti_cubes: self.anti_cubes + other.anti_cubes,
            heart_pieces: self.heart_pieces + other.heart_pieces,
            bits: self.bits + other.bits,
            keys: self.keys + other.keys,
            owls: self.owls + other.owls,
            water_lower: self.water_lower || other.water_lower,
            other: text,
        }
    }

    /// Total spendable cubes. Eight bits convert to one cube.
    pub fn total_cubes(&self) -> i32 {
        self.golden_cubes + self.anti_cubes + self.bits / 8
    }

    pub fn is_empty(&self) -> bool {
        *self == Collectibles::default()
    }
}

/// One physical entrance/exit point of a level.
#[derive(Clone, Debug, Deserialize)]
pub struct Entrance {
    /// Owning level name, filled in at load time.
    #[serde(default)]
    pub level: String,
    pub volume_id: i32,
    pub viewpoint: String,
    /// Where this doorway led before randomization. The level-changer mod
    /// keys its overrides on (level, original_destination).
    pub original_destination: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub cubes_required: i32,
    #[serde(default)]
    pub needs_water_lowered: bool,
    #[serde(default)]
    pub needs_all_owls: bool,
}

impl Entrance {
    /// True if no gate is active at all.
    pub fn can_exit(&self) -> bool {
        !self.locked
            && self.cubes_required == 0
            && !self.needs_water_lowered
            && !self.needs_all_owls
    }

    /// True if this doorway can be opened from its own side given the
    /// ledger: ungated, or locked with a key in hand. The other gates are
    /// one-sided and block the doorway entirely.
    pub fn can_open_exit(&self, ledger: &Collectibles) -> bool {
        (!self.locked || ledger.keys >= 1)
            && self.cubes_required == 0
            && !self.needs_water_lowered
            && !self.needs_all_owls
    }

    /// True if this doorway can be entered from outside given the ledger.
    pub fn can_enter(&self, ledger: &Collectibles) -> bool {
        (!self.locked || ledger.keys >= 1)
            && self.cubes_required <= ledger.total_cubes()
            && (!self.needs_water_lowered || ledger.water_lower)
            && (!self.needs_all_owls || ledger.owls == FULL_OWL_COUNT)
    }
}

/// Special-case category of a level, resolved from the dataset's name
/// lists at load time so the algorithm never matches on strings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LevelRole {
    /// Ordinary level with no special handling.
    Filler,
    /// The level the tree is seeded with.
    Start,
    /// Backbone waypoint used by the hub skeleton phase.
    Hub,
    /// First half of the paired interior room.
    InteriorA,
    /// Second half of the paired interior room.
    InteriorB,
    /// Joining this level pulls the sewer start in behind it.
    Well,
    /// Held out of circulation; reachable only through the well.
    SewerStart,
    /// Held out of circulation entirely.
    HeldOut,
}

/// A doorway removed from a level's unused pool. `degraded` is set when
/// no doorway satisfied the eligibility predicate and a gated one was
/// handed out so the construction could still make progress.
#[derive(Clone, Debug)]
pub struct TakenDoor {
    pub entrance: Entrance,
    pub degraded: bool,
}

#[derive(Clone, Debug)]
pub struct Level {
    pub name: String,
    pub collectibles: Collectibles,
    pub entrances: Vec<Entrance>,
    /// Doorways not yet wired into the graph. Only ever shrinks.
    pub unused_entrances: Vec<Entrance>,
    /// The level has one exit-only direction that must be re-anchored
    /// back into the graph right after it joins.
    pub one_way: bool,
    /// Entry doorway is always index 0 (asymmetric in-game geometry).
    pub fixed_entry: bool,
    pub role: LevelRole,
    /// Diagnostic marker: this level was first reached through a locked
    /// doorway (or inherited the marker from one that was).
    pub behind_key: bool,
    /// Adjacency by arena index; levels never own each other.
    pub connected: Vec<LevelId>,
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Level {
    /// Remove and return a uniformly random unused doorway openable from
    /// this side. Falls back to an arbitrary unused doorway (degraded)
    /// when none qualify, so the construction never deadlocks on gates.
    pub fn take_exit(&mut self, rng: &mut StdRng, ledger: &Collectibles) -> Result<TakenDoor> {
        if self.unused_entrances.is_empty() {
            bail!("no unused doorways left in level {}", self.name);
        }
        let eligible: Vec<usize> = self
            .unused_entrances
            .iter()
            .enumerate()
            .filter(|(_, e)| e.can_open_exit(ledger))
            .map(|(i, _)| i)
            .collect();
        match eligible.choose(rng) {
            Some(&i) => Ok(TakenDoor {
                entrance: self.unused_entrances.remove(i),
                degraded: false,
            }),
            None => {
                warn!("{}: no exit-eligible doorway left, taking a gated one", self.name);
                let i = rng.gen_range(0..self.unused_entrances.len());
                Ok(TakenDoor {
                    entrance: self.unused_entrances.remove(i),
                    degraded: true,
                })
            }
        }
    }

    /// Remove and return a uniformly random unused doorway enterable
    /// under `ledger`, with the same degraded fallback as `take_exit`.
    /// Fixed-entry levels always hand out index 0.
    pub fn take_entry(&mut self, rng: &mut StdRng, ledger: &Collectibles) -> Result<TakenDoor> {
        if self.unused_entrances.is_empty() {
            bail!("no unused doorways left in level {}", self.name);
        }
        if self.fixed_entry {
            return Ok(TakenDoor {
                entrance: self.unused_entrances.remove(0),
                degraded: false,
            });
        }
        let eligible: Vec<usize> = self
            .unused_entrances
            .iter()
            .enumerate()
            .filter(|(_, e)| e.can_enter(ledger))
            .map(|(i, _)| i)
            .collect();
        match eligible.choose(rng) {
            Some(&i) => Ok(TakenDoor {
                entrance: self.unused_entrances.remove(i),
                degraded: false,
            }),
            None => {
                warn!("{}: no enter-eligible doorway left, taking a gated one", self.name);
                let i = rng.gen_range(0..self.unused_entrances.len());
                Ok(TakenDoor {
                    entrance: self.unused_entrances.remove(i),
                    degraded: true,
                })
            }
        }
    }

    /// How many unused doorways are currently openable from this side.
    pub fn open_exit_count(&self, ledger: &Collectibles) -> usize {
        self.unused_entrances
            .iter()
            .filter(|e| e.can_open_exit(ledger))
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.unused_entrances.is_empty()
    }
}

/// Cycle-safe depth-first reachability over the adjacency lists.
pub fn is_reachable(
    levels: &[Level],
    from: LevelId,
    target: LevelId,
    visited: &mut HashSet<LevelId>,
) -> bool {
    if from == target {
        return true;
    }
    if !visited.insert(from) {
        return false;
    }
    levels[from]
        .connected
        .iter()
        .any(|&next| is_reachable(levels, next, target, visited))
}

#[derive(Deserialize)]
struct LevelRecord {
    name: String,
    #[serde(default)]
    one_way: bool,
    #[serde(default)]
    collectibles: Collectibles,
    entrances: Vec<Entrance>,
}

fn default_hub_links() -> usize {
    5
}

fn default_filler_removals() -> usize {
    4
}

#[derive(Deserialize)]
struct DataFile {
    start_level: String,
    #[serde(default)]
    hub_levels: Vec<String>,
    #[serde(default = "default_hub_links")]
    hub_links: usize,
    #[serde(default)]
    interior_pair: Option<(String, String)>,
    #[serde(default)]
    well_level: Option<String>,
    #[serde(default)]
    sewer_start: Option<String>,
    #[serde(default)]
    held_out: Vec<String>,
    #[serde(default)]
    fixed_entry: Vec<String>,
    #[serde(default = "default_filler_removals")]
    filler_removals: usize,
    #[serde(default)]
    starting_collectibles: Collectibles,
    levels: Vec<LevelRecord>,
}

/// The loaded level arena plus the resolved special-case table.
pub struct GameData {
    pub levels: Vec<Level>,
    pub index_by_name: HashMap<String, LevelId>,
    pub start_level: LevelId,
    pub hub_levels: Vec<LevelId>,
    pub hub_links: usize,
    pub interior_pair: Option<(LevelId, LevelId)>,
    pub well_level: Option<LevelId>,
    pub sewer_start: Option<LevelId>,
    pub held_out: Vec<LevelId>,
    pub filler_removals: usize,
    pub starting_collectibles: Collectibles,
}

impl GameData {
    pub fn load(path: &Path) -> Result<GameData> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read level data at {}", path.display()))?;
        let game_data = Self::from_json(&data)
            .with_context(|| format!("unable to parse level data at {}", path.display()))?;
        for diagnostic in game_data.validate_pairings() {
            warn!("{diagnostic}");
        }
        Ok(game_data)
    }

    pub fn from_json(data: &str) -> Result<GameData> {
        let file: DataFile = serde_json::from_str(data)?;

        let mut levels: Vec<Level> = Vec::with_capacity(file.levels.len());
        let mut index_by_name: HashMap<String, LevelId> = HashMap::new();
        for record in file.levels {
            if index_by_name.contains_key(&record.name) {
                bail!("duplicate level name: {}", record.name);
            }
            let mut entrances = record.entrances;
            for e in &mut entrances {
                e.level = record.name.clone();
            }
            index_by_name.insert(record.name.clone(), levels.len());
            levels.push(Level {
                name: record.name,
                collectibles: record.collectibles,
                unused_entrances: entrances.clone(),
                entrances,
                one_way: record.one_way,
                fixed_entry: false,
                role: LevelRole::Filler,
                behind_key: false,
                connected: vec![],
            });
        }

        let resolve = |name: &str| -> Result<LevelId> {
            index_by_name
                .get(name)
                .copied()
                .with_context(|| format!("unknown level name in dataset config: {name}"))
        };

        let start_level = resolve(&file.start_level)?;
        levels[start_level].role = LevelRole::Start;

        let mut hub_levels = vec![];
        for name in &file.hub_levels {
            let id = resolve(name)?;
            levels[id].role = LevelRole::Hub;
            hub_levels.push(id);
        }

        let interior_pair = match &file.interior_pair {
            Some((a, b)) => {
                let (a, b) = (resolve(a)?, resolve(b)?);
                levels[a].role = LevelRole::InteriorA;
                levels[b].role = LevelRole::InteriorB;
                Some((a, b))
            }
            None => None,
        };

        let well_level = match &file.well_level {
            Some(name) => {
                let id = resolve(name)?;
                levels[id].role = LevelRole::Well;
                Some(id)
            }
            None => None,
        };
        let sewer_start = match &file.sewer_start {
            Some(name) => {
                let id = resolve(name)?;
                levels[id].role = LevelRole::SewerStart;
                Some(id)
            }
            None => None,
        };
        if well_level.is_some() != sewer_start.is_some() {
            bail!("well_level and sewer_start must be configured together");
        }

        let mut held_out = vec![];
        for name in &file.held_out {
            let id = resolve(name)?;
            levels[id].role = LevelRole::HeldOut;
            held_out.push(id);
        }
        for name in &file.fixed_entry {
            let id = resolve(name)?;
            levels[id].fixed_entry = true;
        }

        Ok(GameData {
            levels,
            index_by_name,
            start_level,
            hub_levels,
            hub_links: file.hub_links,
            interior_pair,
            well_level,
            sewer_start,
            held_out,
            filler_removals: file.filler_removals,
            starting_collectibles: file.starting_collectibles,
        })
    }

    /// Every doorway pointing at level B should have a counterpart in B
    /// pointing back, except doorways touching the interior pair, which
    /// is asymmetric by design. Returns one diagnostic per mismatch;
    /// the dataset is maintainer-curated, so these are advisory.
    pub fn validate_pairings(&self) -> Vec<String> {
        let mut diagnostics = vec![];
        for level in &self.levels {
            for entrance in &level.entrances {
                if self.is_interior_name(&entrance.level)
                    || self.is_interior_name(&entrance.original_destination)
                {
                    continue;
                }
                let paired = self
                    .index_by_name
                    .get(&entrance.original_destination)
                    .map(|&dest| {
                        self.levels[dest]
                            .entrances
                            .iter()
                            .any(|back| back.original_destination == entrance.level)
                    })
                    .unwrap_or(false);
                if !paired {
                    diagnostics.push(format!(
                        "misconfigured level data: doorway {} -> {} (volume {}) has no return doorway",
                        entrance.level, entrance.original_destination, entrance.volume_id
                    ));
                }
            }
        }
        diagnostics
    }

    fn is_interior_name(&self, name: &str) -> bool {
        match self.interior_pair {
            Some((a, b)) => self.levels[a].name == name || self.levels[b].name == name,
            None => false,
        }
    }

    /// The other half of the interior pair, if `id` is one of them.
    pub fn interior_twin(&self, id: LevelId) -> Option<LevelId> {
        match self.interior_pair {
            Some((a, b)) if id == a => Some(b),
            Some((a, b)) if id == b => Some(a),
            _ => None,
        }
    }

    /// Rendered label for an original-destination field. The interior
    /// pair models one physical room, so the second variant's name
    /// collapses onto the first in output.
    pub fn render_destination<'a>(&'a self, name: &'a str) -> &'a str {
        if let Some((a, b)) = self.interior_pair {
            if self.levels[b].name == name {
                return &self.levels[a].name;
            }
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ledger(keys: i32) -> Collectibles {
        Collectibles {
            keys,
            ..Default::default()
        }
    }

    #[test]
    fn test_total_cubes() {
        let c = Collectibles {
            golden_cubes: 2,
            anti_cubes: 1,
            bits: 10,
            ..Default::default()
        };
        assert_eq!(c.total_cubes(), 4);
    }

    #[test]
    fn test_combine() {
        let a = Collectibles {
            keys: 1,
            other: "a".to_string(),
            ..Default::default()
        };
        let b = Collectibles {
            keys: 2,
            water_lower: true,
            other: "b".to_string(),
            ..Default::default()
        };
        let c = a.combine(&b);
        assert_eq!(c.keys, 3);
        assert!(c.water_lower);
        assert_eq!(c.other, "a, b");
        assert!(!c.is_empty());
        assert!(Collectibles::default().is_empty());
    }

    fn entrance(locked: bool, cubes_required: i32) -> Entrance {
        Entrance {
            level: "A".to_string(),
            volume_id: 1,
            viewpoint: "FRONT".to_string(),
            original_destination: "B".to_string(),
            locked,
            cubes_required,
            needs_water_lowered: false,
            needs_all_owls: false,
        }
    }

    #[test]
    fn test_doorway_eligibility() {
        let plain = entrance(false, 0);
        assert!(plain.can_exit());
        assert!(plain.can_enter(&Collectibles::default()));

        let locked = entrance(true, 0);
        assert!(!locked.can_exit());
        assert!(!locked.can_open_exit(&ledger(0)));
        assert!(locked.can_open_exit(&ledger(1)));
        assert!(!locked.can_enter(&ledger(0)));
        assert!(locked.can_enter(&ledger(1)));

        let gated = entrance(false, 4);
        assert!(!gated.can_exit());
        assert!(!gated.can_enter(&Collectibles::default()));
        let rich = Collectibles {
            golden_cubes: 3,
            bits: 9,
            ..Default::default()
        };
        assert!(gated.can_enter(&rich));

        let mut owls = entrance(false, 0);
        owls.needs_all_owls = true;
        assert!(!owls.can_enter(&Collectibles {
            owls: 3,
            ..Default::default()
        }));
        assert!(owls.can_enter(&Collectibles {
            owls: FULL_OWL_COUNT,
            ..Default::default()
        }));
    }

    #[test]
    fn test_take_exit_empty_pool_is_fatal() {
        let mut level = Level {
            name: "A".to_string(),
            collectibles: Collectibles::default(),
            entrances: vec![],
            unused_entrances: vec![],
            one_way: false,
            fixed_entry: false,
            role: LevelRole::Filler,
            behind_key: false,
            connected: vec![],
        };
        let mut rng = StdRng::from_seed([0; 32]);
        assert!(level.take_exit(&mut rng, &Collectibles::default()).is_err());
        assert!(level.take_entry(&mut rng, &Collectibles::default()).is_err());
    }

    #[test]
    fn test_take_exit_prefers_eligible_and_degrades() {
        let mut level = Level {
            name: "A".to_string(),
            collectibles: Collectibles::default(),
            entrances: vec![],
            unused_entrances: vec![entrance(true, 0), entrance(false, 0)],
            one_way: false,
            fixed_entry: false,
            role: LevelRole::Filler,
            behind_key: false,
            connected: vec![],
        };
        let mut rng = StdRng::from_seed([0; 32]);
        let first = level.take_exit(&mut rng, &ledger(0)).unwrap();
        assert!(!first.degraded);
        assert!(!first.entrance.locked);
        // Only the locked doorway remains and there is no key.
        let second = level.take_exit(&mut rng, &ledger(0)).unwrap();
        assert!(second.degraded);
        assert!(second.entrance.locked);
        assert_eq!(level.open_exit_count(&ledger(0)), 0);
    }

    const PAIRED_JSON: &str = r#"{
        "start_level": "A",
        "filler_removals": 0,
        "hub_links": 0,
        "levels": [
            {"name": "A", "entrances": [
                {"volume_id": 1, "viewpoint": "FRONT", "original_destination": "B"}
            ]},
            {"name": "B", "entrances": [
                {"volume_id": 2, "viewpoint": "BACK", "original_destination": "A"}
            ]}
        ]
    }"#;

    #[test]
    fn test_load_and_pairing_validation() {
        let game_data = GameData::from_json(PAIRED_JSON).unwrap();
        assert!(game_data.validate_pairings().is_empty());
        assert_eq!(game_data.levels[game_data.start_level].role, LevelRole::Start);
        assert_eq!(game_data.levels[0].entrances[0].level, "A");

        let asymmetric = PAIRED_JSON.replace("\"original_destination\": \"A\"", "\"original_destination\": \"C\"");
        let asymmetric = asymmetric.replace(
            "{\"name\": \"B\",",
            "{\"name\": \"C\", \"entrances\": []}, {\"name\": \"B\",",
        );
        let game_data = GameData::from_json(&asymmetric).unwrap();
        // A -> B has no return and B -> C has no return.
        assert_eq!(game_data.validate_pairings().len(), 2);
    }

    #[test]
    fn test_unknown_special_name_is_an_error() {
        let bad = PAIRED_JSON.replace("\"start_level\": \"A\"", "\"start_level\": \"NOPE\"");
        assert!(GameData::from_json(&bad).is_err());
    }

    #[test]
    fn test_interior_relabeling() {
        let json = r#"{
            "start_level": "A",
            "interior_pair": ["CABIN_INTERIOR_A", "CABIN_INTERIOR_B"],
            "levels": [
                {"name": "A", "entrances": []},
                {"name": "CABIN_INTERIOR_A", "entrances": []},
                {"name": "CABIN_INTERIOR_B", "entrances": []}
            ]
        }"#;
        let game_data = GameData::from_json(json).unwrap();
        assert_eq!(game_data.render_destination("CABIN_INTERIOR_B"), "CABIN_INTERIOR_A");
        assert_eq!(game_data.render_destination("CABIN_INTERIOR_A"), "CABIN_INTERIOR_A");
        assert_eq!(game_data.render_destination("A"), "A");
        let (a, b) = game_data.interior_pair.unwrap();
        assert_eq!(game_data.interior_twin(a), Some(b));
        assert_eq!(game_data.interior_twin(b), Some(a));
    }
}
