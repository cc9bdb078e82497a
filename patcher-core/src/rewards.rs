use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::address::AddressTranslator;
use crate::patch::PatchSet;
use crate::{PatcherError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Dungeon {
    EasternPalace,
    DesertPalace,
    TowerOfHera,
    PalaceOfDarkness,
    SwampPalace,
    SkullWoods,
    ThievesTown,
    IcePalace,
    MiseryMire,
    TurtleRock,
}

impl Dungeon {
    pub const ALL: [Dungeon; 10] = [
        Dungeon::EasternPalace,
        Dungeon::DesertPalace,
        Dungeon::TowerOfHera,
        Dungeon::PalaceOfDarkness,
        Dungeon::SwampPalace,
        Dungeon::SkullWoods,
        Dungeon::ThievesTown,
        Dungeon::IcePalace,
        Dungeon::MiseryMire,
        Dungeon::TurtleRock,
    ];
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum RewardKind {
    CrystalBlue,
    CrystalRed,
    PendantGreen,
    PendantNonGreen,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RewardCategory {
    Crystal,
    Pendant,
}

impl RewardKind {
    pub fn category(self) -> RewardCategory {
        match self {
            RewardKind::CrystalBlue | RewardKind::CrystalRed => RewardCategory::Crystal,
            RewardKind::PendantGreen | RewardKind::PendantNonGreen => RewardCategory::Pendant,
        }
    }
}

/// A reward-bearing dungeon and the kind of reward it holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardRegion {
    pub dungeon: Dungeon,
    pub reward: RewardKind,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubPool {
    pub kind: RewardKind,
    pub values: Vec<u8>,
}

/// Reward values per category, sub-pools listed in assignment order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardPools {
    pub crystals: Vec<SubPool>,
    pub pendants: Vec<SubPool>,
}

impl Default for RewardPools {
    fn default() -> Self {
        Self {
            crystals: vec![
                SubPool { kind: RewardKind::CrystalBlue, values: vec![1, 2, 3, 4, 7] },
                SubPool { kind: RewardKind::CrystalRed, values: vec![5, 6] },
            ],
            pendants: vec![
                SubPool { kind: RewardKind::PendantGreen, values: vec![1] },
                SubPool { kind: RewardKind::PendantNonGreen, values: vec![2, 3] },
            ],
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardTables {
    pub addresses: BTreeMap<Dungeon, Vec<u32>>,
    pub crystal_patterns: BTreeMap<u8, Vec<u8>>,
    pub pendant_patterns: BTreeMap<u8, Vec<u8>>,
}

fn reward_addresses(dungeon: Dungeon) -> [u32; 6] {
    match dungeon {
        Dungeon::EasternPalace => [0x2A09D, 0xABEF8, 0xABEF9, 0x308052, 0x30807C, 0x1C6FE],
        Dungeon::DesertPalace => [0x2A09E, 0xABF1C, 0xABF1D, 0x308053, 0x308078, 0x1C6FF],
        Dungeon::TowerOfHera => [0x2A0A5, 0xABF0A, 0xABF0B, 0x30805A, 0x30807A, 0x1C706],
        Dungeon::PalaceOfDarkness => [0x2A0A1, 0xABF00, 0xABF01, 0x308056, 0x30807D, 0x1C702],
        Dungeon::SwampPalace => [0x2A0A0, 0xABF6C, 0xABF6D, 0x308055, 0x308071, 0x1C701],
        Dungeon::SkullWoods => [0x2A0A3, 0xABF12, 0xABF13, 0x308058, 0x30807B, 0x1C704],
        Dungeon::ThievesTown => [0x2A0A6, 0xABF36, 0xABF37, 0x30805B, 0x308077, 0x1C707],
        Dungeon::IcePalace => [0x2A0A4, 0xABF5A, 0xABF5B, 0x308059, 0x308073, 0x1C705],
        Dungeon::MiseryMire => [0x2A0A2, 0xABF48, 0xABF49, 0x308057, 0x308075, 0x1C703],
        Dungeon::TurtleRock => [0x2A0A7, 0xABF24, 0xABF25, 0x30805C, 0x308079, 0x1C708],
    }
}

fn crystal_pattern(value: u8) -> Option<[u8; 6]> {
    Some(match value {
        1 => [0x02, 0x34, 0x64, 0x40, 0x7F, 0x06],
        2 => [0x10, 0x34, 0x64, 0x40, 0x79, 0x06],
        3 => [0x40, 0x34, 0x64, 0x40, 0x6C, 0x06],
        4 => [0x20, 0x34, 0x64, 0x40, 0x6D, 0x06],
        5 => [0x04, 0x32, 0x64, 0x40, 0x6E, 0x06],
        6 => [0x01, 0x32, 0x64, 0x40, 0x6F, 0x06],
        7 => [0x08, 0x34, 0x64, 0x40, 0x7C, 0x06],
        _ => return None,
    })
}

fn pendant_pattern(value: u8) -> Option<[u8; 6]> {
    Some(match value {
        1 => [0x04, 0x38, 0x62, 0x00, 0x69, 0x01],
        2 => [0x01, 0x32, 0x60, 0x00, 0x69, 0x03],
        3 => [0x02, 0x34, 0x60, 0x00, 0x69, 0x02],
        _ => return None,
    })
}

impl Default for RewardTables {
    fn default() -> Self {
        let addresses = Dungeon::ALL
            .iter()
            .map(|&d| (d, reward_addresses(d).to_vec()))
            .collect();
        let crystal_patterns = (1..=7u8)
            .filter_map(|v| crystal_pattern(v).map(|p| (v, p.to_vec())))
            .collect();
        let pendant_patterns = (1..=3u8)
            .filter_map(|v| pendant_pattern(v).map(|p| (v, p.to_vec())))
            .collect();
        Self {
            addresses,
            crystal_patterns,
            pendant_patterns,
        }
    }
}

impl RewardTables {
    fn patterns(&self, category: RewardCategory) -> &BTreeMap<u8, Vec<u8>> {
        match category {
            RewardCategory::Crystal => &self.crystal_patterns,
            RewardCategory::Pendant => &self.pendant_patterns,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardAssignment {
    pub dungeon: Dungeon,
    pub kind: RewardKind,
    pub value: u8,
}

pub struct RewardAssigner<'a> {
    translator: &'a AddressTranslator,
    tables: &'a RewardTables,
    pools: &'a RewardPools,
}

impl<'a> RewardAssigner<'a> {
    pub fn new(translator: &'a AddressTranslator, tables: &'a RewardTables, pools: &'a RewardPools) -> Self {
        Self {
            translator,
            tables,
            pools,
        }
    }

    /// Shuffles every sub-pool and deals its values onto the regions of the
    /// matching kind, in region order.
    pub fn assign<R: Rng>(
        &self,
        regions: &[RewardRegion],
        rng: &mut R,
    ) -> Result<(PatchSet, Vec<RewardAssignment>)> {
        self.check_regions(regions)?;

        let mut patches = PatchSet::new();
        let mut assignments = Vec::with_capacity(regions.len());

        for (category, pools) in [
            (RewardCategory::Crystal, &self.pools.crystals),
            (RewardCategory::Pendant, &self.pools.pendants),
        ] {
            let mut values = Vec::new();
            let mut targets: Vec<&RewardRegion> = Vec::new();

            for pool in pools {
                if pool.kind.category() != category {
                    return Err(PatcherError::InvalidRewardAssignment(format!(
                        "{:?} pool listed under {:?}",
                        pool.kind, category
                    )));
                }

                let mut shuffled = pool.values.clone();
                shuffled.shuffle(rng);

                let matching: Vec<&RewardRegion> =
                    regions.iter().filter(|r| r.reward == pool.kind).collect();
                if matching.len() != shuffled.len() {
                    return Err(PatcherError::InvalidRewardAssignment(format!(
                        "{} {:?} regions for a pool of {} values",
                        matching.len(),
                        pool.kind,
                        shuffled.len()
                    )));
                }

                values.extend(shuffled);
                targets.extend(matching);
            }

            for (region, value) in targets.into_iter().zip(values) {
                self.write_reward(&mut patches, region.dungeon, category, value)?;
                assignments.push(RewardAssignment {
                    dungeon: region.dungeon,
                    kind: region.reward,
                    value,
                });
            }
        }

        debug!("Assigned {} rewards ({} edits)", assignments.len(), patches.len());
        Ok((patches, assignments))
    }

    fn check_regions(&self, regions: &[RewardRegion]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for region in regions {
            if !seen.insert(region.dungeon) {
                return Err(PatcherError::InvalidRewardAssignment(format!(
                    "{:?} listed more than once",
                    region.dungeon
                )));
            }
            let pooled = self
                .pools
                .crystals
                .iter()
                .chain(&self.pools.pendants)
                .any(|p| p.kind == region.reward);
            if !pooled {
                return Err(PatcherError::InvalidRewardAssignment(format!(
                    "no pool for {:?} at {:?}",
                    region.reward, region.dungeon
                )));
            }
        }
        Ok(())
    }

    fn write_reward(
        &self,
        patches: &mut PatchSet,
        dungeon: Dungeon,
        category: RewardCategory,
        value: u8,
    ) -> Result<()> {
        let addresses = self.tables.addresses.get(&dungeon).ok_or_else(|| {
            PatcherError::InvalidRewardAssignment(format!("no reward addresses for {:?}", dungeon))
        })?;
        let pattern = self.tables.patterns(category).get(&value).ok_or_else(|| {
            PatcherError::InvalidRewardAssignment(format!("{:?} value {} has no byte pattern", category, value))
        })?;
        if addresses.len() != pattern.len() {
            return Err(PatcherError::InvalidRewardAssignment(format!(
                "{:?} has {} addresses but {:?} value {} has {} bytes",
                dungeon,
                addresses.len(),
                category,
                value,
                pattern.len()
            )));
        }

        for (&addr, &byte) in addresses.iter().zip(pattern) {
            patches.push_at(self.translator, addr, vec![byte])?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Medallion {
    Bombos,
    Ether,
    Quake,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MedallionRequirement {
    pub dungeon: Dungeon,
    pub medallion: Medallion,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MedallionTables {
    pub addresses: BTreeMap<Dungeon, Vec<u32>>,
    pub patterns: BTreeMap<Dungeon, BTreeMap<Medallion, Vec<u8>>>,
}

impl Default for MedallionTables {
    fn default() -> Self {
        let mut addresses = BTreeMap::new();
        addresses.insert(Dungeon::TurtleRock, vec![0x308023, 0xD020, 0xD0FF, 0xD1DE]);
        addresses.insert(Dungeon::MiseryMire, vec![0x308022, 0xCFF2, 0xD0D1, 0xD1B0]);

        let mut tr = BTreeMap::new();
        tr.insert(Medallion::Bombos, vec![0x00, 0x51, 0x10, 0x00]);
        tr.insert(Medallion::Ether, vec![0x01, 0x51, 0x18, 0x00]);
        tr.insert(Medallion::Quake, vec![0x02, 0x14, 0xEF, 0xC4]);

        let mut mm = BTreeMap::new();
        mm.insert(Medallion::Bombos, vec![0x00, 0x51, 0x00, 0x00]);
        mm.insert(Medallion::Ether, vec![0x01, 0x13, 0x9F, 0xF1]);
        mm.insert(Medallion::Quake, vec![0x02, 0x51, 0x08, 0x00]);

        let mut patterns = BTreeMap::new();
        patterns.insert(Dungeon::TurtleRock, tr);
        patterns.insert(Dungeon::MiseryMire, mm);

        Self { addresses, patterns }
    }
}

pub fn write_medallions(
    translator: &AddressTranslator,
    tables: &MedallionTables,
    requirements: &[MedallionRequirement],
) -> Result<PatchSet> {
    let mut patches = PatchSet::new();
    for req in requirements {
        let addresses = tables.addresses.get(&req.dungeon);
        let pattern = tables
            .patterns
            .get(&req.dungeon)
            .and_then(|p| p.get(&req.medallion));
        let (addresses, pattern) = match (addresses, pattern) {
            (Some(a), Some(p)) if a.len() == p.len() => (a, p),
            _ => {
                return Err(PatcherError::InvalidRewardAssignment(format!(
                    "{:?} cannot require {:?}",
                    req.dungeon, req.medallion
                )))
            }
        };

        for (&addr, &byte) in addresses.iter().zip(pattern) {
            patches.push_at(translator, addr, vec![byte])?;
        }
    }
    Ok(patches)
}

const DUNGEON_MUSIC: [u8; 10] = [0x11, 0x11, 0x11, 0x16, 0x16, 0x16, 0x16, 0x16, 0x16, 0x16];

fn music_addresses(dungeon: Dungeon) -> &'static [u32] {
    match dungeon {
        Dungeon::EasternPalace => &[0x2D59A],
        Dungeon::DesertPalace => &[0x2D59B, 0x2D59C, 0x2D59D, 0x2D59E],
        Dungeon::TowerOfHera => &[0x2D5C5, 0x2907A, 0x28B8C],
        Dungeon::PalaceOfDarkness => &[0x2D5B8],
        Dungeon::SwampPalace => &[0x2D5B7],
        Dungeon::SkullWoods => &[
            0x2D5BA, 0x2D5BB, 0x2D5BC, 0x2D5BD, 0x2D608, 0x2D609, 0x2D60A, 0x2D60B,
        ],
        Dungeon::ThievesTown => &[0x2D5C6],
        Dungeon::IcePalace => &[0x2D5BF],
        Dungeon::MiseryMire => &[0x2D5B9],
        Dungeon::TurtleRock => &[0x2D5C7, 0x2D5A7, 0x2D5AA, 0x2D5AB],
    }
}

/// Pendant dungeons get the light-world theme and crystal dungeons the dark
/// one. Nothing is written under keysanity.
pub fn write_dungeon_music(
    translator: &AddressTranslator,
    regions: &[RewardRegion],
    keysanity: bool,
) -> Result<PatchSet> {
    let mut patches = PatchSet::new();
    if keysanity {
        return Ok(patches);
    }

    let pendants = regions
        .iter()
        .filter(|r| r.reward.category() == RewardCategory::Pendant);
    let crystals = regions
        .iter()
        .filter(|r| r.reward.category() == RewardCategory::Crystal);

    for (region, &music) in pendants.chain(crystals).zip(DUNGEON_MUSIC.iter()) {
        for &addr in music_addresses(region.dungeon) {
            patches.push_at(translator, addr, vec![music])?;
        }
    }
    Ok(patches)
}

pub fn standard_regions() -> Vec<RewardRegion> {
    use Dungeon::*;
    use RewardKind::*;
    [
        (EasternPalace, PendantGreen),
        (DesertPalace, PendantNonGreen),
        (TowerOfHera, PendantNonGreen),
        (PalaceOfDarkness, CrystalBlue),
        (SwampPalace, CrystalBlue),
        (SkullWoods, CrystalBlue),
        (ThievesTown, CrystalBlue),
        (IcePalace, CrystalRed),
        (MiseryMire, CrystalRed),
        (TurtleRock, CrystalBlue),
    ]
    .into_iter()
    .map(|(dungeon, reward)| RewardRegion { dungeon, reward })
    .collect()
}
