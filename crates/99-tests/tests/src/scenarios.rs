//! Single-block scenarios: contiguous and wrapped beamlets, flags, fan-out,
//! and receivers facing malformed peers.

use std::collections::BTreeSet;

use bytes::Bytes;
use transport::Rank;
use transpose::{
    data_tag, flags_tag, header_tag, BeamletDistribution, ProtocolError, SampleRing,
    StationLayout, Topology, TransposeError,
};
use transpose_codecs::{BeamletEntry, BlockHeader, FlagSet, HeaderLimits};

use crate::group::{expected_samples, Group};

const STATION: Rank = Rank(0);

fn one_station(beamlets: Vec<u32>, destinations: Vec<(Rank, Vec<u32>)>, bps: usize) -> Topology {
    Topology::new(
        vec![StationLayout::new(STATION, beamlets)],
        BeamletDistribution::new(destinations).unwrap(),
        HeaderLimits::default(),
        bps,
    )
    .unwrap()
}

#[test]
fn contiguous_block_travels_as_one_transfer() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0], vec![(Rank(1), vec![0])], 4))?;
    let sender = group.sender(STATION, 1024)?;
    let receiver = group.receiver(Rank(1))?;

    let block = SampleRing::new(1, 1024).block(0, 1024)?;
    let receipt = sender.send_block(&block, &FlagSet::new(), Bytes::new())?;
    assert_eq!(receipt.transfers_for(Rank(1), 0), Some(1));

    let assembled = receiver.receive_block()?;
    receipt.wait()?;

    let samples = assembled.samples(0, STATION).unwrap();
    assert_eq!(samples.len(), 1024 * 4);
    assert_eq!(&samples[..], &expected_samples(STATION, 0, 1024, 4, 0, 1024)[..]);
    // header + 1 data + flags
    assert_eq!(group.bridge(Rank(1)).metrics().receives_posted, 3);
    assert!(assembled.flags.is_empty());
    group.shutdown()
}

#[test]
fn wrapped_block_is_reassembled_in_time_order() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0], vec![(Rank(1), vec![0])], 4))?;
    let sender = group.sender(STATION, 1024)?;
    let receiver = group.receiver(Rank(1))?;

    let block = SampleRing::new(1, 1024).block(1536, 2560)?;
    assert_eq!(block.wrap_offset(0), 512);
    let receipt = sender.send_block(&block, &FlagSet::new(), Bytes::new())?;
    assert_eq!(receipt.transfers_for(Rank(1), 0), Some(2));

    let assembled = receiver.receive_block()?;
    receipt.wait()?;

    assert_eq!((assembled.from, assembled.to), (1536, 2560));
    let samples = assembled.samples(0, STATION).unwrap();
    assert_eq!(
        &samples[..],
        &expected_samples(STATION, 0, 1024, 4, 1536, 2560)[..]
    );
    // header + 2 data + flags
    assert_eq!(group.bridge(Rank(1)).metrics().receives_posted, 4);
    group.shutdown()
}

#[test]
fn flags_and_metadata_arrive_unchanged() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0, 1], vec![(Rank(1), vec![1])], 2))?;
    let sender = group.sender(STATION, 64)?;
    let receiver = group.receiver(Rank(1))?;

    let flags = FlagSet::from_ranges([30..40, 10..20]);
    let metadata = Bytes::from_static(b"subband 7; pointing (1.2, 0.4)");
    let block = SampleRing::new(2, 64).block(0, 48)?;
    let receipt = sender.send_block(&block, &flags, metadata.clone())?;
    let assembled = receiver.receive_block()?;
    receipt.wait()?;

    assert_eq!(assembled.flags.ranges(), &[10..20, 30..40]);
    assert_eq!(assembled.station_flags(STATION), Some(&flags));
    assert_eq!(assembled.stations[0].metadata, metadata);
    assert_eq!(
        &assembled.samples(1, STATION).unwrap()[..],
        &expected_samples(STATION, 1, 64, 2, 0, 48)[..]
    );
    group.shutdown()
}

#[test]
fn fan_out_sends_each_beamlet_to_exactly_one_destination() -> anyhow::Result<()> {
    let topology = one_station(
        vec![0, 1, 2, 3],
        vec![(Rank(1), vec![0, 1, 2]), (Rank(2), vec![3])],
        1,
    );
    let group = Group::new(3, topology)?;
    let sender = group.sender(STATION, 32)?;
    let a = group.receiver(Rank(1))?;
    let b = group.receiver(Rank(2))?;

    let block = SampleRing::new(4, 32).block(24, 40)?;
    let receipt = sender.send_block(&block, &FlagSet::new(), Bytes::new())?;
    assert_eq!(receipt.ranks().collect::<Vec<_>>(), vec![Rank(1), Rank(2)]);
    assert_eq!(receipt.beamlets_for(Rank(1)), vec![0, 1, 2]);
    assert_eq!(receipt.beamlets_for(Rank(2)), vec![3]);
    // 2 headers + 2 flag sets + 4 beamlets * 2 ranges
    assert_eq!(receipt.handle_count(), 12);

    let (at_a, at_b) = std::thread::scope(|scope| {
        let at_b = scope.spawn(|| b.receive_block());
        (a.receive_block(), at_b.join().unwrap())
    });
    let (at_a, at_b) = (at_a?, at_b?);
    receipt.wait()?;

    let keys_a: BTreeSet<u32> = at_a.beamlets.keys().copied().collect();
    let keys_b: BTreeSet<u32> = at_b.beamlets.keys().copied().collect();
    assert_eq!(keys_a, BTreeSet::from([0, 1, 2]));
    assert_eq!(keys_b, BTreeSet::from([3]));
    assert!(keys_a.is_disjoint(&keys_b));
    for slot in 0..3 {
        assert_eq!(
            &at_a.samples(slot, STATION).unwrap()[..],
            &expected_samples(STATION, slot as usize, 32, 1, 24, 40)[..]
        );
    }
    assert_eq!(
        &at_b.samples(3, STATION).unwrap()[..],
        &expected_samples(STATION, 3, 32, 1, 24, 40)[..]
    );
    assert_eq!(group.fabric.unmatched(), 0);
    group.shutdown()
}

#[test]
fn stations_sharing_a_beamlet_both_deliver_it() -> anyhow::Result<()> {
    let topology = Topology::new(
        vec![
            StationLayout::new(Rank(0), vec![5, 6]),
            StationLayout::new(Rank(1), vec![5]),
        ],
        BeamletDistribution::new([(Rank(2), vec![5])])?,
        HeaderLimits::default(),
        2,
    )?;
    let group = Group::new(3, topology)?;
    let first = group.sender(Rank(0), 16)?;
    let second = group.sender(Rank(1), 16)?;
    let receiver = group.receiver(Rank(2))?;

    let sent = [
        first.send_block(
            &SampleRing::new(2, 16).block(4, 12)?,
            &FlagSet::from_ranges([0..1]),
            Bytes::new(),
        )?,
        second.send_block(
            &SampleRing::new(1, 16).block(4, 12)?,
            &FlagSet::from_ranges([7..8]),
            Bytes::new(),
        )?,
    ];
    let assembled = receiver.receive_block()?;
    for receipt in sent {
        receipt.wait()?;
    }

    assert_eq!(assembled.beamlets[&5].len(), 2);
    assert_eq!(
        &assembled.samples(5, Rank(0)).unwrap()[..],
        &expected_samples(Rank(0), 0, 16, 2, 4, 12)[..]
    );
    assert_eq!(
        &assembled.samples(5, Rank(1)).unwrap()[..],
        &expected_samples(Rank(1), 0, 16, 2, 4, 12)[..]
    );
    assert_eq!(assembled.flags.ranges(), &[0..1, 7..8]);
    group.shutdown()
}

/// Posts a hand-built block from `station` without going through a Sender.
fn post_raw_block(
    group: &Group,
    station: Rank,
    dest: Rank,
    header: &BlockHeader,
    data: Vec<(u32, usize, Bytes)>,
) -> anyhow::Result<()> {
    let bridge = group.bridge(station);
    let mut handles = vec![bridge.post_send(header.encode(&HeaderLimits::default())?, dest, header_tag())?];
    for (slot, range, payload) in data {
        handles.push(bridge.post_send(payload, dest, data_tag(slot, range)?)?);
    }
    handles.push(bridge.post_send(FlagSet::new().encode(16)?, dest, flags_tag())?);
    for handle in handles {
        handle.wait()?;
    }
    Ok(())
}

#[test]
fn wrap_offset_outside_the_block_means_one_transfer() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0], vec![(Rank(1), vec![0])], 1))?;
    let receiver = group.receiver(Rank(1))?;
    let header = BlockHeader {
        from: 0,
        to: 8,
        beamlets: vec![BeamletEntry::wrapped(0, 8)],
        metadata: Bytes::new(),
    };

    std::thread::scope(|scope| {
        let station = scope.spawn(|| {
            post_raw_block(
                &group,
                STATION,
                Rank(1),
                &header,
                vec![(0, 0, Bytes::from_static(b"abcdefgh"))],
            )
        });
        let assembled = receiver.receive_block()?;
        station.join().unwrap()?;
        assert_eq!(&assembled.samples(0, STATION).unwrap()[..], b"abcdefgh");
        anyhow::Ok(())
    })?;
    group.shutdown()
}

#[test]
fn unexpected_slot_in_header_is_a_protocol_error() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0, 1], vec![(Rank(1), vec![0])], 1))?;
    let receiver = group.receiver(Rank(1))?;
    let header = BlockHeader {
        from: 0,
        to: 4,
        beamlets: vec![BeamletEntry::single(1)],
        metadata: Bytes::new(),
    };
    let bridge = group.bridge(STATION);
    let sent = bridge.post_send(
        header.encode(&HeaderLimits::default())?,
        Rank(1),
        header_tag(),
    )?;

    let err = receiver.receive_block().unwrap_err();
    sent.wait()?;
    assert!(matches!(
        err,
        TransposeError::Protocol(ProtocolError::UnexpectedBeamlet {
            station: STATION,
            position: 0,
            expected: 0,
            actual: 1
        })
    ));
    group.shutdown()
}

#[test]
fn oversize_block_is_refused_before_buffering() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0], vec![(Rank(1), vec![0])], 4))?;
    let receiver = group.receiver(Rank(1))?;
    let header = BlockHeader {
        from: 0,
        to: 1 << 46,
        beamlets: vec![BeamletEntry::single(0)],
        metadata: Bytes::new(),
    };
    let sent = group.bridge(STATION).post_send(
        header.encode(&HeaderLimits::default())?,
        Rank(1),
        header_tag(),
    )?;

    let err = receiver.receive_block().unwrap_err();
    sent.wait()?;
    assert!(matches!(
        err,
        TransposeError::Protocol(ProtocolError::BlockTooLarge {
            station: STATION,
            samples,
        }) if samples == 1 << 46
    ));
    assert_eq!(group.bridge(Rank(1)).metrics().receives_posted, 1);
    group.shutdown()
}

#[test]
fn short_data_transfer_is_reported() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0], vec![(Rank(1), vec![0])], 1))?;
    let receiver = group.receiver(Rank(1))?;
    let header = BlockHeader {
        from: 0,
        to: 8,
        beamlets: vec![BeamletEntry::single(0)],
        metadata: Bytes::new(),
    };

    let err = std::thread::scope(|scope| {
        let station = scope.spawn(|| {
            post_raw_block(
                &group,
                STATION,
                Rank(1),
                &header,
                vec![(0, 0, Bytes::from_static(b"abc"))],
            )
        });
        let err = receiver.receive_block().unwrap_err();
        station.join().unwrap()?;
        anyhow::Ok(err)
    })?;
    assert!(matches!(
        err,
        TransposeError::Protocol(ProtocolError::ShortTransfer {
            expected: 8,
            actual: 3,
            ..
        })
    ));
    group.shutdown()
}

#[test]
fn garbage_header_is_malformed() -> anyhow::Result<()> {
    let group = Group::new(2, one_station(vec![0], vec![(Rank(1), vec![0])], 1))?;
    let receiver = group.receiver(Rank(1))?;
    let sent = group.bridge(STATION).post_send(
        Bytes::from_static(&[1, 2, 3]),
        Rank(1),
        header_tag(),
    )?;
    let err = receiver.receive_block().unwrap_err();
    sent.wait()?;
    assert!(matches!(
        err,
        TransposeError::Protocol(ProtocolError::Malformed { station: STATION, .. })
    ));
    // Nothing but the header was posted on either side.
    assert_eq!(group.fabric.unmatched(), 0);
    group.shutdown()
}
