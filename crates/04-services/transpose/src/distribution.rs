use std::collections::{BTreeMap, HashMap, HashSet};

use transport::Rank;
use transpose_codecs::HeaderLimits;

use crate::error::ConfigError;
use crate::tags::MAX_SLOT;

/// Global beamlet ids a station produces, indexed by station-local slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationLayout {
    pub rank: Rank,
    pub beamlets: Vec<u32>,
}

impl StationLayout {
    pub fn new(rank: Rank, beamlets: Vec<u32>) -> Self {
        Self { rank, beamlets }
    }

    pub fn slots(&self) -> usize {
        self.beamlets.len()
    }

    pub fn slot_of(&self, beamlet: u32) -> Option<u32> {
        self.beamlets
            .iter()
            .position(|b| *b == beamlet)
            .map(|slot| slot as u32)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.beamlets.len() > MAX_SLOT as usize + 1 {
            return Err(ConfigError::TooManySlots {
                station: self.rank,
                slots: self.beamlets.len(),
                max: MAX_SLOT + 1,
            });
        }
        let mut seen = HashSet::with_capacity(self.beamlets.len());
        for beamlet in &self.beamlets {
            if !seen.insert(*beamlet) {
                return Err(ConfigError::DuplicateSlot {
                    station: self.rank,
                    beamlet: *beamlet,
                });
            }
        }
        Ok(())
    }
}

/// One beamlet travelling from a station to a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BeamletRoute {
    /// Station-local slot.
    pub slot: u32,
    /// Global beamlet id.
    pub beamlet: u32,
}

/// Destination rank → ordered global beamlet ids. Lists are pairwise disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeamletDistribution {
    destinations: BTreeMap<Rank, Vec<u32>>,
}

impl BeamletDistribution {
    pub fn new<I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (Rank, Vec<u32>)>,
    {
        let mut destinations = BTreeMap::new();
        let mut owners = HashMap::new();
        for (rank, beamlets) in entries {
            for beamlet in &beamlets {
                if let Some(first) = owners.insert(*beamlet, rank) {
                    return Err(ConfigError::OverlappingOwnership {
                        beamlet: *beamlet,
                        first,
                        second: rank,
                    });
                }
            }
            if destinations.insert(rank, beamlets).is_some() {
                return Err(ConfigError::DuplicateDestination(rank));
            }
        }
        if owners.is_empty() {
            return Err(ConfigError::EmptyDistribution);
        }
        Ok(Self { destinations })
    }

    /// Beamlets `dest` consumes, in distribution order. Empty for unknown ranks.
    pub fn beamlets_for(&self, dest: Rank) -> &[u32] {
        self.destinations
            .get(&dest)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, dest: Rank) -> bool {
        self.destinations.contains_key(&dest)
    }

    /// Destinations in ascending rank order.
    pub fn destinations(&self) -> impl Iterator<Item = (Rank, &[u32])> + '_ {
        self.destinations
            .iter()
            .map(|(rank, beamlets)| (*rank, beamlets.as_slice()))
    }

    /// Beamlets `station` sends to `dest`, in the destination's order.
    pub fn routes(&self, station: &StationLayout, dest: Rank) -> Vec<BeamletRoute> {
        self.beamlets_for(dest)
            .iter()
            .filter_map(|beamlet| {
                station.slot_of(*beamlet).map(|slot| BeamletRoute {
                    slot,
                    beamlet: *beamlet,
                })
            })
            .collect()
    }
}

/// Validated static layout of a transpose group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pub stations: Vec<StationLayout>,
    pub distribution: BeamletDistribution,
    pub limits: HeaderLimits,
    pub bytes_per_sample: usize,
}

impl Topology {
    pub fn new(
        stations: Vec<StationLayout>,
        distribution: BeamletDistribution,
        limits: HeaderLimits,
        bytes_per_sample: usize,
    ) -> Result<Self, ConfigError> {
        if bytes_per_sample == 0 {
            return Err(ConfigError::ZeroLimit("bytes_per_sample"));
        }
        let mut ranks = HashSet::with_capacity(stations.len());
        let mut produced = HashSet::new();
        for station in &stations {
            if !ranks.insert(station.rank) {
                return Err(ConfigError::DuplicateStation(station.rank));
            }
            station.check()?;
            produced.extend(station.beamlets.iter().copied());
        }
        for (_, beamlets) in distribution.destinations() {
            if let Some(missing) = beamlets.iter().find(|b| !produced.contains(*b)) {
                return Err(ConfigError::UnproducedBeamlet(*missing));
            }
        }
        for station in &stations {
            for (dest, _) in distribution.destinations() {
                let count = distribution.routes(station, dest).len();
                if count > limits.max_beamlets as usize {
                    return Err(ConfigError::TooManyBeamlets {
                        station: station.rank,
                        dest,
                        count,
                        max: limits.max_beamlets,
                    });
                }
            }
        }
        Ok(Self {
            stations,
            distribution,
            limits,
            bytes_per_sample,
        })
    }

    pub fn station(&self, rank: Rank) -> Result<&StationLayout, ConfigError> {
        self.stations
            .iter()
            .find(|s| s.rank == rank)
            .ok_or(ConfigError::UnknownStation(rank))
    }

    /// Stations contributing at least one beamlet to `dest`, in configuration order.
    pub fn contributors(&self, dest: Rank) -> Vec<(&StationLayout, Vec<BeamletRoute>)> {
        self.stations
            .iter()
            .map(|station| (station, self.distribution.routes(station, dest)))
            .filter(|(_, routes)| !routes.is_empty())
            .collect()
    }
}
