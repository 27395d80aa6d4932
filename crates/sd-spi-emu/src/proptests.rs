use crate::{CacheMode, Device, DeviceConfig, MemStore, BLOCK_SIZE};
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

const CAPACITY_BLOCKS: u32 = 8;
const MAX_OPS: usize = 48;

#[derive(Debug, Clone)]
enum Op {
    Write {
        block: u32,
        offset: usize,
        data: Vec<u8>,
    },
    Read {
        block: u32,
        offset: usize,
        len: usize,
    },
    Flush,
    Erase {
        start: u32,
        end: u32,
    },
    /// Continuous write of one full block per seed, then a partial tail block.
    StreamWrite {
        start: u32,
        seeds: Vec<u8>,
        tail: Vec<u8>,
    },
    StreamRead {
        start: u32,
        count: u32,
    },
}

fn partial_write_strategy() -> BoxedStrategy<Op> {
    (0..CAPACITY_BLOCKS, 0..=BLOCK_SIZE)
        .prop_flat_map(|(block, offset)| {
            (
                Just(block),
                Just(offset),
                prop::collection::vec(any::<u8>(), 0..=BLOCK_SIZE - offset),
            )
        })
        .prop_map(|(block, offset, data)| Op::Write {
            block,
            offset,
            data,
        })
        .boxed()
}

fn full_write_strategy() -> BoxedStrategy<Op> {
    (0..CAPACITY_BLOCKS, prop::collection::vec(any::<u8>(), BLOCK_SIZE))
        .prop_map(|(block, data)| Op::Write {
            block,
            offset: 0,
            data,
        })
        .boxed()
}

fn read_strategy() -> BoxedStrategy<Op> {
    (0..CAPACITY_BLOCKS, 0..=BLOCK_SIZE)
        .prop_flat_map(|(block, offset)| (Just(block), Just(offset), 0..=BLOCK_SIZE - offset))
        .prop_map(|(block, offset, len)| Op::Read { block, offset, len })
        .boxed()
}

fn erase_strategy() -> BoxedStrategy<Op> {
    (0..=CAPACITY_BLOCKS, 0..=CAPACITY_BLOCKS)
        .prop_map(|(a, b)| Op::Erase {
            start: a.min(b),
            end: a.max(b),
        })
        .boxed()
}

fn stream_write_strategy() -> BoxedStrategy<Op> {
    (0..CAPACITY_BLOCKS)
        .prop_flat_map(|start| {
            // Leave room for the tail block after the full ones.
            let room = (CAPACITY_BLOCKS - start) as usize;
            (
                Just(start),
                prop::collection::vec(any::<u8>(), 0..room),
                prop::collection::vec(any::<u8>(), 0..BLOCK_SIZE),
            )
        })
        .prop_map(|(start, seeds, tail)| Op::StreamWrite { start, seeds, tail })
        .boxed()
}

fn stream_read_strategy() -> BoxedStrategy<Op> {
    (0..CAPACITY_BLOCKS)
        .prop_flat_map(|start| (Just(start), 1..=CAPACITY_BLOCKS - start))
        .prop_map(|(start, count)| Op::StreamRead { start, count })
        .boxed()
}

fn ops_strategy() -> BoxedStrategy<Vec<Op>> {
    let op = prop_oneof![
        5 => partial_write_strategy(),
        2 => full_write_strategy(),
        4 => read_strategy(),
        1 => Just(Op::Flush),
        1 => erase_strategy(),
        1 => stream_write_strategy(),
        1 => stream_read_strategy(),
    ];
    prop::collection::vec(op, 1..=MAX_OPS).boxed()
}

fn block_range(block: u32) -> std::ops::Range<usize> {
    let base = block as usize * BLOCK_SIZE;
    base..base + BLOCK_SIZE
}

fn run_ops(mode: CacheMode, ops: &[Op]) -> TestCaseResult {
    let cfg = DeviceConfig::with_capacity(CAPACITY_BLOCKS).with_cache(mode);
    let mut dev = Device::initialize(&cfg, MemStore::new()).unwrap();
    let mut model = vec![0u8; CAPACITY_BLOCKS as usize * BLOCK_SIZE];

    for op in ops {
        match op {
            Op::Write {
                block,
                offset,
                data,
            } => {
                dev.write(*block, data, *offset).unwrap();

                let image = &mut model[block_range(*block)];
                if mode == CacheMode::Direct {
                    image.fill(0);
                }
                image[*offset..*offset + data.len()].copy_from_slice(data);

                // Read-after-write must match what we wrote.
                let mut back = vec![0xA5u8; data.len()];
                dev.read(*block, &mut back, *offset).unwrap();
                prop_assert_eq!(back.as_slice(), data.as_slice());
            }
            Op::Read { block, offset, len } => {
                let mut buf = vec![0xA5u8; *len];
                dev.read(*block, &mut buf, *offset).unwrap();
                let image = &model[block_range(*block)];
                prop_assert_eq!(buf.as_slice(), &image[*offset..*offset + *len]);
            }
            Op::Flush => {
                dev.flush().unwrap();
                prop_assert!(!dev.has_pending_write());
            }
            Op::Erase { start, end } => {
                dev.erase_range(*start, *end).unwrap();
                model[*start as usize * BLOCK_SIZE..*end as usize * BLOCK_SIZE].fill(0);
            }
            Op::StreamWrite { start, seeds, tail } => {
                dev.start_continuous_write(*start, seeds.len() as u32 + 1)
                    .unwrap();
                for (i, seed) in seeds.iter().enumerate() {
                    let payload = [*seed; BLOCK_SIZE];
                    dev.write_next(&payload, 0).unwrap();
                    model[block_range(*start + i as u32)].copy_from_slice(&payload);

                    // The block the session moved on to still reads back its stored contents.
                    let next = *start + i as u32 + 1;
                    let mut buf = [0u8; BLOCK_SIZE];
                    dev.read(next, &mut buf, 0).unwrap();
                    prop_assert_eq!(&buf[..], &model[block_range(next)]);
                }
                dev.write_next(tail, 0).unwrap();
                dev.stop_continuous_write().unwrap();
                prop_assert!(dev.session().is_none());

                let image = &mut model[block_range(*start + seeds.len() as u32)];
                image.fill(0);
                image[..tail.len()].copy_from_slice(tail);
            }
            Op::StreamRead { start, count } => {
                dev.start_continuous_read(*start).unwrap();
                let mut buf = [0u8; BLOCK_SIZE];
                for i in 0..*count {
                    if i > 0 {
                        dev.read_advance().unwrap();
                    }
                    dev.read_next(&mut buf, 0).unwrap();
                    prop_assert_eq!(&buf[..], &model[block_range(*start + i)]);
                }
                dev.stop_continuous_read().unwrap();
            }
        }
        prop_assert!(!dev.is_selected());
    }

    dev.flush().unwrap();
    prop_assert!(!dev.has_pending_write());

    let mut buf = [0u8; BLOCK_SIZE];
    for block in 0..CAPACITY_BLOCKS {
        dev.read(block, &mut buf, 0).unwrap();
        prop_assert_eq!(&buf[..], &model[block_range(block)]);
    }
    prop_assert_eq!(dev.store().as_slice(), model.as_slice());

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_write_back_card_matches_reference(ops in ops_strategy()) {
        run_ops(CacheMode::WriteBack, &ops)?;
    }

    #[test]
    fn prop_direct_card_matches_reference(ops in ops_strategy()) {
        run_ops(CacheMode::Direct, &ops)?;
    }
}
