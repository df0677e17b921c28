//! BYE placement for knockout draws.
//!
//! Placement is table driven: for a draw size and a BYE count the table lists
//! the zero-based slots that receive a BYE marker. The built-in table puts each
//! BYE opposite one of the top seeds of the classic seeding order, so no two BYEs
//! ever meet in the first round.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::warn;

/// Smallest supported draw.
pub const MIN_DRAW_SIZE: usize = 8;
/// Largest supported draw.
pub const MAX_DRAW_SIZE: usize = 128;

/// Table as stored in JSON: `drawSize -> byeCount -> slot indices`, keys as strings.
pub type RawByeTable = IndexMap<String, IndexMap<String, Vec<usize>>>;

/// Draw construction failures. None of them may be worked around by a naive placement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
    #[error("draw size {0} must be a power of two between {MIN_DRAW_SIZE} and {MAX_DRAW_SIZE}")]
    InvalidDrawSize(usize),
    #[error("no BYE placement table for draw size {0}")]
    MissingDrawSize(usize),
    #[error("{entrants} entrants do not fit in a draw of {size}")]
    TooManyEntrants { size: usize, entrants: usize },
    #[error("{requested} BYEs requested but {supplied} BYE entrants supplied")]
    ByeCountMismatch { requested: usize, supplied: usize },
    #[error("invalid BYE placement table: {0}")]
    InvalidTable(String),
}

/// Validated BYE placement table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByeTable {
    entries: BTreeMap<usize, BTreeMap<usize, Vec<usize>>>,
}

impl ByeTable {
    /// Table for every supported draw size and every BYE count up to half the draw.
    pub fn standard() -> Self {
        let mut entries = BTreeMap::new();
        let mut size = MIN_DRAW_SIZE;
        while size <= MAX_DRAW_SIZE {
            let order = seed_order(size);
            let mut positions = vec![0; size + 1];
            for (slot, seed) in order.iter().enumerate() {
                positions[*seed] = slot;
            }

            let counts = (1..=size / 2)
                .map(|count| {
                    let mut slots = (1..=count)
                        .map(|seed| positions[seed] ^ 1)
                        .collect::<Vec<_>>();
                    slots.sort_unstable();
                    (count, slots)
                })
                .collect();
            entries.insert(size, counts);
            size *= 2;
        }
        Self { entries }
    }

    /// Validate a table read from configuration.
    pub fn from_raw(raw: RawByeTable) -> Result<Self, BracketError> {
        let mut entries = BTreeMap::new();
        for (size_key, counts) in raw {
            let size = parse_key(&size_key)?;
            if !is_supported_size(size) {
                return Err(BracketError::InvalidTable(format!(
                    "draw size {size} is not a power of two between {MIN_DRAW_SIZE} and {MAX_DRAW_SIZE}"
                )));
            }

            let mut parsed = BTreeMap::new();
            for (count_key, slots) in counts {
                let count = parse_key(&count_key)?;
                if count == 0 || count > size {
                    return Err(BracketError::InvalidTable(format!(
                        "draw {size}: BYE count {count} out of range"
                    )));
                }
                if slots.len() != count {
                    return Err(BracketError::InvalidTable(format!(
                        "draw {size}: {count} BYEs but {} slots listed",
                        slots.len()
                    )));
                }
                let mut seen = BTreeSet::new();
                for slot in &slots {
                    if *slot >= size || !seen.insert(*slot) {
                        return Err(BracketError::InvalidTable(format!(
                            "draw {size}, {count} BYEs: slot {slot} is out of range or repeated"
                        )));
                    }
                }
                parsed.insert(count, slots);
            }
            entries.insert(size, parsed);
        }
        Ok(Self { entries })
    }

    /// JSON-friendly form, suitable for [`ByeTable::from_raw`].
    pub fn to_raw(&self) -> RawByeTable {
        self.entries
            .iter()
            .map(|(size, counts)| {
                let counts = counts
                    .iter()
                    .map(|(count, slots)| (count.to_string(), slots.clone()))
                    .collect();
                (size.to_string(), counts)
            })
            .collect()
    }

    /// Slots for the largest tabulated BYE count not above `requested`.
    ///
    /// Returns the count actually covered together with its slots.
    pub fn placement(&self, draw_size: usize, requested: usize) -> Result<(usize, &[usize]), BracketError> {
        let counts = self
            .entries
            .get(&draw_size)
            .ok_or(BracketError::MissingDrawSize(draw_size))?;
        let nothing: &[usize] = &[];
        if requested == 0 {
            return Ok((0, nothing));
        }
        Ok(counts
            .range(..=requested)
            .next_back()
            .map(|(count, slots)| (*count, slots.as_slice()))
            .unwrap_or((0, nothing)))
    }
}

/// Size of a draw and the number of BYEs it must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawConfig {
    pub size: usize,
    pub requested_bye_count: usize,
}

/// One entry of the ordered entrant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entrant<P> {
    Pair(P),
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOccupant<P> {
    Pair(P),
    Bye,
    Empty,
}

/// A first-round slot of the draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketSlot<P> {
    pub index: usize,
    pub occupant: SlotOccupant<P>,
}

/// Places BYE markers and pairs into the first round of a knockout draw.
#[derive(Debug, Clone)]
pub struct BracketSeedAssigner {
    table: ByeTable,
}

impl Default for BracketSeedAssigner {
    fn default() -> Self {
        Self::new(ByeTable::standard())
    }
}

impl BracketSeedAssigner {
    pub fn new(table: ByeTable) -> Self {
        Self { table }
    }

    /// Place `entrants` into `draw.size` slots.
    ///
    /// The first BYE entrants go to the table slots for the largest tabulated
    /// count not above the request. Every other entrant, leftover BYEs included,
    /// fills the remaining slots in ascending order, keeping its original order.
    pub fn assign<P>(
        &self,
        draw: DrawConfig,
        entrants: Vec<Entrant<P>>,
    ) -> Result<Vec<BracketSlot<P>>, BracketError> {
        if !is_supported_size(draw.size) {
            return Err(BracketError::InvalidDrawSize(draw.size));
        }
        let (covered, bye_slots) = self
            .table
            .placement(draw.size, draw.requested_bye_count)?;

        if entrants.len() > draw.size {
            return Err(BracketError::TooManyEntrants {
                size: draw.size,
                entrants: entrants.len(),
            });
        }
        let supplied = entrants
            .iter()
            .filter(|entrant| matches!(entrant, Entrant::Bye))
            .count();
        if supplied != draw.requested_bye_count {
            return Err(BracketError::ByeCountMismatch {
                requested: draw.requested_bye_count,
                supplied,
            });
        }
        if covered < draw.requested_bye_count {
            warn!(
                draw_size = draw.size,
                requested = draw.requested_bye_count,
                covered,
                "no BYE placement for the requested count; using a smaller table entry"
            );
        }

        let mut occupants = (0..draw.size)
            .map(|_| SlotOccupant::Empty)
            .collect::<Vec<SlotOccupant<P>>>();
        for slot in bye_slots {
            occupants[*slot] = SlotOccupant::Bye;
        }

        let mut byes_to_skip = covered;
        let mut free = (0..draw.size).filter(|slot| !bye_slots.contains(slot));
        for entrant in entrants {
            let occupant = match entrant {
                Entrant::Bye if byes_to_skip > 0 => {
                    byes_to_skip -= 1;
                    continue;
                }
                Entrant::Bye => SlotOccupant::Bye,
                Entrant::Pair(pair) => SlotOccupant::Pair(pair),
            };
            // Entrant count was checked against the draw size.
            if let Some(slot) = free.next() {
                occupants[slot] = occupant;
            }
        }

        Ok(occupants
            .into_iter()
            .enumerate()
            .map(|(index, occupant)| BracketSlot { index, occupant })
            .collect())
    }
}

fn is_supported_size(size: usize) -> bool {
    size.is_power_of_two() && (MIN_DRAW_SIZE..=MAX_DRAW_SIZE).contains(&size)
}

fn parse_key(key: &str) -> Result<usize, BracketError> {
    key.trim()
        .parse()
        .map_err(|_| BracketError::InvalidTable(format!("`{key}` is not a number")))
}

/// Classic seeding order: seed `s` meets seed `n + 1 - s` in the first round.
fn seed_order(size: usize) -> Vec<usize> {
    let mut order = vec![1];
    while order.len() < size {
        let round = order.len() * 2 + 1;
        order = order.iter().flat_map(|&seed| [seed, round - seed]).collect();
    }
    order
}
