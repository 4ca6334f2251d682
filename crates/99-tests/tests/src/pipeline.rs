//! Streams of blocks from several stations to several destinations, each rank
//! on its own thread.

use std::thread;

use bytes::Bytes;
use crossbeam_channel::unbounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use transport::Rank;
use transpose::{
    AssembledBlock, BeamletDistribution, SampleRing, StationLayout, Topology, TransposeConfig,
};
use transpose_codecs::{FlagSet, HeaderLimits};

use crate::group::{expected_samples, Group};

/// Checks every beamlet of `block` against what each producing station holds.
fn verify(topology: &Topology, dest: Rank, block: &AssembledBlock, capacity: usize) {
    let wanted = topology.distribution.beamlets_for(dest);
    assert_eq!(block.beamlets.len(), wanted.len(), "beamlets at {dest}");
    for beamlet in wanted {
        let producers: Vec<&StationLayout> = topology
            .stations
            .iter()
            .filter(|s| s.slot_of(*beamlet).is_some())
            .collect();
        assert_eq!(block.beamlets[beamlet].len(), producers.len());
        for station in producers {
            let slot = station.slot_of(*beamlet).unwrap() as usize;
            let expected = expected_samples(
                station.rank,
                slot,
                capacity,
                topology.bytes_per_sample,
                block.from,
                block.to,
            );
            assert_eq!(
                &block.samples(*beamlet, station.rank).unwrap()[..],
                &expected[..],
                "beamlet {beamlet} from {} over [{}, {})",
                station.rank,
                block.from,
                block.to
            );
        }
    }
}

fn station_flags(station: Rank, index: u64) -> FlagSet {
    let start = (index as u32 % 7) + station.0 * 10;
    FlagSet::from_ranges([start..start + 2])
}

/// Runs `spans` through every station and returns what each destination saw.
fn stream(
    group: &Group,
    capacity: usize,
    spans: &[(u64, u64)],
) -> anyhow::Result<Vec<(Rank, Vec<AssembledBlock>)>> {
    let stations: Vec<Rank> = group.topology.stations.iter().map(|s| s.rank).collect();
    let destinations: Vec<Rank> = group
        .topology
        .distribution
        .destinations()
        .map(|(rank, _)| rank)
        .collect();

    thread::scope(|scope| {
        let producers: Vec<_> = stations
            .iter()
            .map(|&rank| {
                scope.spawn(move || -> anyhow::Result<()> {
                    let sender = group.sender(rank, capacity)?;
                    let ring = SampleRing::new(sender.arena().slots(), capacity);
                    for (index, &(from, to)) in spans.iter().enumerate() {
                        let metadata = Bytes::from(format!("block {index}"));
                        let flags = station_flags(rank, index as u64);
                        sender
                            .send_block(&ring.block(from, to)?, &flags, metadata)?
                            .wait()?;
                    }
                    Ok(())
                })
            })
            .collect();

        let consumers: Vec<_> = destinations
            .iter()
            .map(|&rank| {
                let (tx, rx) = unbounded();
                let worker = scope.spawn(move || -> anyhow::Result<usize> {
                    Ok(group.receiver(rank)?.run(spans.len(), &tx)?)
                });
                (rank, rx, worker)
            })
            .collect();

        for producer in producers {
            producer.join().unwrap()?;
        }
        let mut seen = Vec::with_capacity(consumers.len());
        for (rank, rx, worker) in consumers {
            assert_eq!(worker.join().unwrap()?, spans.len());
            seen.push((rank, rx.try_iter().collect()));
        }
        Ok(seen)
    })
}

fn two_by_two(bytes_per_sample: usize) -> Topology {
    Topology::new(
        vec![
            StationLayout::new(Rank(0), vec![0, 1, 2]),
            StationLayout::new(Rank(1), vec![2, 3]),
        ],
        BeamletDistribution::new([(Rank(2), vec![0, 2]), (Rank(3), vec![3, 1])]).unwrap(),
        HeaderLimits::default(),
        bytes_per_sample,
    )
    .unwrap()
}

#[test]
fn consecutive_blocks_cross_the_wrap_point() -> anyhow::Result<()> {
    const CAPACITY: usize = 100;
    let group = Group::new(4, two_by_two(2))?;
    let spans: Vec<(u64, u64)> = (0..6).map(|i| (i * 40, i * 40 + 40)).collect();

    let seen = stream(&group, CAPACITY, &spans)?;
    for (dest, blocks) in &seen {
        assert_eq!(blocks.len(), spans.len());
        for (index, block) in blocks.iter().enumerate() {
            assert_eq!((block.from, block.to), spans[index]);
            verify(&group.topology, *dest, block, CAPACITY);
            let expected = station_flags(Rank(0), index as u64)
                .union(&station_flags(Rank(1), index as u64));
            assert_eq!(block.flags, expected);
            assert_eq!(block.stations.len(), 2);
            assert_eq!(block.stations[1].metadata, format!("block {index}").as_bytes());
        }
    }
    assert_eq!(group.fabric.unmatched(), 0);
    group.shutdown()
}

#[test]
fn random_block_lengths_stay_aligned() -> anyhow::Result<()> {
    const CAPACITY: usize = 64;
    let mut rng = StdRng::seed_from_u64(0x7a15);
    let mut spans = Vec::new();
    let mut from = rng.gen_range(0..1_000u64);
    for _ in 0..24 {
        let len = rng.gen_range(1..=CAPACITY as u64);
        spans.push((from, from + len));
        from += len;
    }

    let group = Group::new(4, two_by_two(3))?;
    let seen = stream(&group, CAPACITY, &spans)?;
    for (dest, blocks) in &seen {
        for block in blocks {
            verify(&group.topology, *dest, block, CAPACITY);
        }
    }
    let metrics = group.bridge(Rank(0)).metrics();
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.sends_posted, metrics.completed);
    group.shutdown()
}

const GROUP_TOML: &str = r#"
    [bridge]
    poll_batch = 8
    idle_wait_ms = 2
    idle_backoff_us = 0

    [limits]
    max_beamlets = 8
    max_flag_ranges = 4

    [block]
    bytes_per_sample = 4

    [[stations]]
    rank = 0
    beamlets = [10, 11]

    [[stations]]
    rank = 1
    beamlets = [12]

    [[distribution]]
    rank = 2
    beamlets = [12, 10, 11]
"#;

#[test]
fn group_built_from_a_config_file() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("transpose-{}.toml", std::process::id()));
    std::fs::write(&path, GROUP_TOML)?;
    let config = TransposeConfig::load(&path);
    std::fs::remove_file(&path)?;
    let config = config?;
    assert_eq!(config.header_limits().max_flag_ranges, 4);

    let group = Group::from_config(3, &config)?;
    let spans = [(0, 16), (16, 40), (40, 48)];
    let seen = stream(&group, 32, &spans)?;
    let (dest, blocks) = &seen[0];
    assert_eq!(*dest, Rank(2));
    for block in blocks {
        verify(&group.topology, *dest, block, 32);
        assert_eq!(block.beamlets.keys().copied().collect::<Vec<_>>(), vec![10, 11, 12]);
    }
    group.shutdown()
}

#[test]
fn run_stops_when_the_consumer_hangs_up() -> anyhow::Result<()> {
    let topology = Topology::new(
        vec![StationLayout::new(Rank(0), vec![0])],
        BeamletDistribution::new([(Rank(1), vec![0])])?,
        HeaderLimits::default(),
        1,
    )?;
    let group = Group::new(2, topology)?;
    let sender = group.sender(Rank(0), 8)?;
    let receiver = group.receiver(Rank(1))?;

    let receipt = sender.send_block(&SampleRing::new(1, 8).block(0, 8)?, &FlagSet::new(), Bytes::new())?;
    let (tx, rx) = unbounded();
    drop(rx);
    assert_eq!(receiver.run(3, &tx)?, 0);
    receipt.wait()?;
    group.shutdown()
}
