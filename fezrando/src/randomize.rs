//! Graph construction: wires every doorway of every level into a
//! randomized connectivity graph while keeping the whole thing
//! beatable. Levels join a growing tree one transition at a time; the
//! collectible ledger tracks what the player could hold by the time a
//! gated doorway becomes relevant.

use anyhow::{bail, Result};
use fezrando_game::{
    is_reachable, Collectibles, Entrance, GameData, Level, LevelId, LevelRole,
};
use hashbrown::HashSet;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// A bidirectional link between two doorways. `from` and `to` are the
/// same doorway when a dead doorway had to be closed onto itself.
#[derive(Clone, Debug)]
pub struct Transition {
    pub from: Entrance,
    pub to: Entrance,
}

/// Outcome of one full construction run.
pub struct Randomization {
    pub seed: u64,
    pub transitions: Vec<Transition>,
    /// Final accumulated ledger.
    pub collectibles: Collectibles,
    /// Levels that ended up in the connected graph, in join order.
    pub connected: Vec<LevelId>,
    /// Final arena state, adjacency included.
    pub levels: Vec<Level>,
    /// Times the target pool came up empty and a doorway was self-paired.
    pub degraded_selections: usize,
    /// Times a gated doorway had to be handed out because no eligible
    /// one remained in its level.
    pub gated_fallbacks: usize,
    /// Times a level connected to itself (through two of its doorways).
    pub self_loops: usize,
    /// One-way re-anchoring transitions emitted.
    pub reanchors: usize,
}

/// Target eligibility ladder for the main loop; first matching rule
/// wins. Tighter rules apply as open doorways run out, so the graph
/// never paints itself into a corner.
#[derive(Copy, Clone, Debug)]
enum TargetRule {
    /// Last doorway in the whole graph: anything goes, including self.
    Any,
    /// No unconnected levels left: any connected level except the source.
    AnyOtherConnected,
    /// Exactly one unconnected level left: it must be joined now.
    ForcedJoin,
    /// One open exit left graph-wide: only a multi-exit, non-one-way
    /// unconnected level keeps the graph alive.
    SafeJoin,
    /// Under three open exits: no one-way levels, they cost an extra
    /// opening to re-anchor.
    NonOneWayJoin,
    /// Plenty of slack: grow the graph rather than loop inside it.
    Join,
}

struct Randomizer<'a> {
    game: &'a GameData,
    /// Working copy of the arena; doorway pools and adjacency mutate here.
    levels: Vec<Level>,
    tree: Vec<LevelId>,
    in_tree: Vec<bool>,
    unused: Vec<LevelId>,
    ledger: Collectibles,
    transitions: Vec<Transition>,
    degraded_selections: usize,
    gated_fallbacks: usize,
    self_loops: usize,
    reanchors: usize,
}

/// Run the full construction for `seed` and return the transition list
/// plus diagnostics. A fixed seed reproduces an identical graph.
pub fn randomize(game: &GameData, seed: u64) -> Result<Randomization> {
    let mut rng_seed = [0u8; 32];
    rng_seed[..8].copy_from_slice(&seed.to_le_bytes());
    let mut rng = StdRng::from_seed(rng_seed);

    let mut randomizer = Randomizer {
        game,
        levels: game.levels.clone(),
        tree: vec![],
        in_tree: vec![false; game.levels.len()],
        unused: vec![],
        ledger: game.starting_collectibles.clone(),
        transitions: vec![],
        degraded_selections: 0,
        gated_fallbacks: 0,
        self_loops: 0,
        reanchors: 0,
    };
    randomizer.setup(&mut rng);
    randomizer.build_hub_skeleton(&mut rng)?;
    randomizer.run(&mut rng)?;

    info!(
        "randomization complete: {} transitions, {} levels connected, {} degraded, {} self-loops",
        randomizer.transitions.len(),
        randomizer.tree.len(),
        randomizer.degraded_selections,
        randomizer.self_loops
    );
    Ok(Randomization {
        seed,
        transitions: randomizer.transitions,
        collectibles: randomizer.ledger,
        connected: randomizer.tree,
        levels: randomizer.levels,
        degraded_selections: randomizer.degraded_selections,
        gated_fallbacks: randomizer.gated_fallbacks,
        self_loops: randomizer.self_loops,
        reanchors: randomizer.reanchors,
    })
}

impl<'a> Randomizer<'a> {
    /// Shuffle circulation order, drop surplus collectible-free
    /// single-entrance fillers, hold the sewer start and held-out levels
    /// aside, and seed the tree with the start level.
    fn setup(&mut self, rng: &mut StdRng) {
        let mut ids: Vec<LevelId> = (0..self.levels.len()).collect();
        ids.shuffle(rng);

        // There are more single-entrance rooms than loopbacks to reach
        // them, so a few collectible-free ones sit out each run.
        let filler_removals = self.game.filler_removals;
        let mut removed = 0;
        ids.retain(|&id| {
            let level = &self.levels[id];
            let removable = level.role == LevelRole::Filler
                && !level.one_way
                && level.collectibles.is_empty()
                && level.entrances.len() == 1;
            if removed < filler_removals && removable {
                info!("removing filler level {}", level.name);
                removed += 1;
                false
            } else {
                true
            }
        });

        self.unused = ids
            .into_iter()
            .filter(|&id| {
                let role = self.levels[id].role;
                id != self.game.start_level
                    && role != LevelRole::SewerStart
                    && role != LevelRole::HeldOut
            })
            .collect();
        self.in_tree[self.game.start_level] = true;
        self.tree.push(self.game.start_level);
    }

    /// Pre-seed a backbone: each link runs a short random chain of
    /// multi-entrance filler levels from an already-connected hub (the
    /// start level counts at first) out to a fresh hub. Afterward every
    /// hub is transitively connected, so the main loop never has to
    /// place hubs under tight doorway constraints.
    fn build_hub_skeleton(&mut self, rng: &mut StdRng) -> Result<()> {
        if self.game.hub_levels.is_empty() || self.game.hub_links == 0 {
            return Ok(());
        }
        let mut connected_hubs: Vec<LevelId> = vec![self.game.start_level];
        for link in 0..self.game.hub_links {
            let origin = {
                let candidates: Vec<LevelId> = connected_hubs
                    .iter()
                    .copied()
                    .filter(|&id| !self.levels[id].is_finished())
                    .collect();
                match candidates.choose(rng) {
                    Some(&id) => id,
                    None => bail!("no connected hub has a doorway left for the backbone"),
                }
            };
            let target = {
                let candidates: Vec<LevelId> = self
                    .unused
                    .iter()
                    .copied()
                    .filter(|&id| self.levels[id].role == LevelRole::Hub)
                    .collect();
                match candidates.choose(rng) {
                    Some(&id) => id,
                    None => bail!("level data ran out of hub levels while building the backbone"),
                }
            };

            let chain_len = rng.gen_range(3..=8);
            let mut pool: Vec<LevelId> = self
                .unused
                .iter()
                .copied()
                .filter(|&id| {
                    let level = &self.levels[id];
                    level.role == LevelRole::Filler && !level.one_way && level.entrances.len() > 1
                })
                .collect();
            let mut chain: Vec<LevelId> = vec![];
            for _ in 0..chain_len {
                if pool.is_empty() {
                    break;
                }
                let i = rng.gen_range(0..pool.len());
                chain.push(pool.swap_remove(i));
            }
            chain.push(target);

            let mut tail = origin;
            for next in chain {
                self.wire(tail, next, rng)?;
                tail = next;
            }
            // The start level seeds only the first link; later links
            // grow the backbone hub to hub.
            if link == 0 {
                connected_hubs.clear();
            }
            connected_hubs.push(target);
        }

        // Bookkeeping sanity: every hub placed so far must be reachable
        // from the start level over the recorded adjacency.
        for &hub in &self.game.hub_levels {
            if self.in_tree[hub] {
                let mut visited = HashSet::new();
                if !is_reachable(&self.levels, self.game.start_level, hub, &mut visited) {
                    warn!("hub {} is not reachable over the backbone", self.levels[hub].name);
                }
            }
        }
        info!("hub skeleton complete: {} levels connected", self.tree.len());
        Ok(())
    }

    /// Main loop: keep wiring doorways until every connected level has
    /// an empty pool. Each iteration consumes at least one doorway, so
    /// the loop terminates on any finite dataset.
    fn run(&mut self, rng: &mut StdRng) -> Result<()> {
        loop {
            let mut unfinished: Vec<LevelId> = self
                .tree
                .iter()
                .copied()
                .filter(|&id| !self.levels[id].is_finished())
                .collect();
            if unfinished.is_empty() {
                break;
            }
            let total_open_exits: usize = unfinished
                .iter()
                .map(|&id| self.levels[id].open_exit_count(&self.ledger))
                .sum();

            let from = {
                let candidates: Vec<LevelId> = unfinished
                    .iter()
                    .copied()
                    .filter(|&id| self.levels[id].open_exit_count(&self.ledger) > 0)
                    .collect();
                match candidates.choose(rng) {
                    Some(&id) => id,
                    None => {
                        warn!("no connected level has an open exit; taking a gated doorway");
                        *unfinished.choose(rng).unwrap()
                    }
                }
            };
            let exit = self.levels[from].take_exit(rng, &self.ledger)?;
            if exit.degraded {
                self.gated_fallbacks += 1;
            }
            if exit.entrance.locked {
                self.consume_key();
            }
            unfinished.retain(|&id| !self.levels[id].is_finished());

            let rule = if self.unused.is_empty() && unfinished.len() == 1 {
                TargetRule::Any
            } else if self.unused.is_empty() {
                TargetRule::AnyOtherConnected
            } else if self.unused.len() == 1 {
                TargetRule::ForcedJoin
            } else if total_open_exits == 1 {
                TargetRule::SafeJoin
            } else if total_open_exits < 3 {
                TargetRule::NonOneWayJoin
            } else {
                TargetRule::Join
            };

            let pool: Vec<LevelId> = unfinished
                .iter()
                .copied()
                .chain(self.unused.iter().copied())
                .filter(|&id| {
                    let level = &self.levels[id];
                    match rule {
                        TargetRule::Any => true,
                        TargetRule::AnyOtherConnected => id != from,
                        TargetRule::ForcedJoin | TargetRule::Join => !self.in_tree[id],
                        TargetRule::SafeJoin => {
                            !self.in_tree[id]
                                && !level.one_way
                                && level.open_exit_count(&self.ledger) >= 2
                        }
                        TargetRule::NonOneWayJoin => !self.in_tree[id] && !level.one_way,
                    }
                })
                .collect();

            let (to, to_entrance, newly_joined) = match pool.choose(rng) {
                Some(&to) => {
                    let newly_joined = !self.in_tree[to];
                    if newly_joined {
                        let behind_key = exit.entrance.locked || self.levels[from].behind_key;
                        self.join(to, behind_key);
                    }
                    let entry = self.levels[to].take_entry(rng, &self.ledger)?;
                    if entry.degraded {
                        self.gated_fallbacks += 1;
                    }
                    (to, entry.entrance, newly_joined)
                }
                None => {
                    warn!(
                        "no eligible target ({rule:?}); closing a {} doorway onto itself",
                        self.levels[from].name
                    );
                    self.degraded_selections += 1;
                    (from, exit.entrance.clone(), false)
                }
            };

            if from == to {
                self.self_loops += 1;
                info!("level {} connecting to itself ({rule:?})", self.levels[from].name);
            }
            self.connect_adjacency(from, to);
            self.transitions.push(Transition {
                from: exit.entrance,
                to: to_entrance,
            });

            if newly_joined {
                self.apply_special_rules(to, rng)?;
            }
        }
        Ok(())
    }

    /// Post-connection rules for levels that never travel alone. Runs
    /// only when `to` actually joined the tree this step.
    fn apply_special_rules(&mut self, to: LevelId, rng: &mut StdRng) -> Result<()> {
        if let Some(twin) = self.game.interior_twin(to) {
            if !self.in_tree[twin] {
                info!(
                    "joining interior twin {} alongside {}",
                    self.levels[twin].name, self.levels[to].name
                );
                let behind_key = self.levels[to].behind_key;
                self.join(twin, behind_key);
                self.connect_adjacency(to, twin);
            }
        }
        if Some(to) == self.game.well_level {
            if let Some(sewer) = self.game.sewer_start {
                if !self.in_tree[sewer] {
                    info!(
                        "joining {} behind {}",
                        self.levels[sewer].name, self.levels[to].name
                    );
                    let behind_key = self.levels[to].behind_key;
                    self.join(sewer, behind_key);
                    self.connect_adjacency(to, sewer);
                    self.connect_one_way(sewer, rng)?;
                }
            }
        } else if self.levels[to].one_way {
            self.connect_one_way(to, rng)?;
        }
        Ok(())
    }

    /// Connect the return doorway of a one-way level back into the
    /// already-connected graph. Must run the moment the level joins;
    /// deferring could leave no unfinished level to anchor to.
    fn connect_one_way(&mut self, level: LevelId, rng: &mut StdRng) -> Result<()> {
        self.reanchors += 1;
        let exit = self.levels[level].take_exit(rng, &self.ledger)?;
        if exit.degraded {
            self.gated_fallbacks += 1;
        }
        if exit.entrance.locked {
            self.consume_key();
        }
        let pool: Vec<LevelId> = self
            .tree
            .iter()
            .copied()
            .filter(|&id| self.levels[id].open_exit_count(&self.ledger) > 0)
            .collect();
        match pool.choose(rng) {
            Some(&to) => {
                let entry = self.levels[to].take_entry(rng, &self.ledger)?;
                if entry.degraded {
                    self.gated_fallbacks += 1;
                }
                self.connect_adjacency(level, to);
                self.transitions.push(Transition {
                    from: exit.entrance,
                    to: entry.entrance,
                });
            }
            None => {
                warn!(
                    "no anchor available for one-way level {}; closing its doorway onto itself",
                    self.levels[level].name
                );
                self.degraded_selections += 1;
                self.transitions.push(Transition {
                    from: exit.entrance.clone(),
                    to: exit.entrance,
                });
            }
        }
        Ok(())
    }

    /// Wire one skeleton link: take an exit from `from`, join `to`, and
    /// record the transition.
    fn wire(&mut self, from: LevelId, to: LevelId, rng: &mut StdRng) -> Result<()> {
        let exit = self.levels[from].take_exit(rng, &self.ledger)?;
        if exit.degraded {
            self.gated_fallbacks += 1;
        }
        if exit.entrance.locked {
            self.consume_key();
        }
        let behind_key = exit.entrance.locked || self.levels[from].behind_key;
        self.join(to, behind_key);
        let entry = self.levels[to].take_entry(rng, &self.ledger)?;
        if entry.degraded {
            self.gated_fallbacks += 1;
        }
        self.connect_adjacency(from, to);
        self.transitions.push(Transition {
            from: exit.entrance,
            to: entry.entrance,
        });
        Ok(())
    }

    /// Absorb a level into the tree: its payload lands in the ledger the
    /// moment it joins, never again. `behind_key` marks levels first
    /// reached through a locked doorway, for diagnostics only.
    fn join(&mut self, id: LevelId, behind_key: bool) {
        if self.in_tree[id] {
            return;
        }
        self.ledger = self.ledger.combine(&self.levels[id].collectibles);
        self.in_tree[id] = true;
        self.tree.push(id);
        self.unused.retain(|&u| u != id);
        if behind_key {
            let level = &mut self.levels[id];
            level.behind_key = true;
            if level.collectibles.keys > 0 {
                warn!("level {} places a key behind a locked doorway", level.name);
            }
        }
    }

    fn connect_adjacency(&mut self, a: LevelId, b: LevelId) {
        if a == b {
            return;
        }
        if !self.levels[a].connected.contains(&b) {
            self.levels[a].connected.push(b);
        }
        if !self.levels[b].connected.contains(&a) {
            self.levels[b].connected.push(a);
        }
    }

    fn consume_key(&mut self) {
        if self.ledger.keys > 0 {
            self.ledger.keys -= 1;
        } else {
            warn!("locked doorway used with no key in the ledger");
        }
    }
}
