mod common;

use common::{index_options, open_memory_table, sorted_rows, two_col_rows, two_col_schema};
use test_log::test;

#[test]
fn concurrent_writers_serialize_at_the_commit() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = open_memory_table(folder.path(), 1_000)?;

    let writer_a = table.clone();
    let writer_b = table.clone();

    std::thread::scope(|scope| {
        let a = scope.spawn(move || {
            writer_a.write(
                &two_col_schema(),
                two_col_rows(0..10_000),
                &index_options(),
            )
        });

        let b = scope.spawn(move || {
            writer_b.write(
                &two_col_schema(),
                two_col_rows(10_000..20_000),
                &index_options(),
            )
        });

        let a = a.join().expect("writer a panicked");
        let b = b.join().expect("writer b panicked");

        assert!(a.is_ok(), "{a:?}");
        assert!(b.is_ok(), "{b:?}");
    });

    // both batches landed exactly once
    assert_eq!(20_000, table.count()?);

    let read_back = table.scan()?.collect::<otree::Result<Vec<_>>>()?;
    assert_eq!(
        sorted_rows(two_col_rows(0..20_000)),
        sorted_rows(read_back)
    );

    // the loser rebased: versions are dense
    let snapshot = table.snapshot()?;
    assert!(snapshot.version().is_some());

    Ok(())
}

#[test]
fn many_small_concurrent_writers() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;

    // plenty of retry budget for a 4-way race
    let table = otree::Config::new(folder.path())
        .default_cube_size(500)
        .number_of_retries(16)
        .open(std::sync::Arc::new(otree::MemoryLog::default()))?;

    // one writer bootstraps the revision so the racers agree on it
    table.write(&two_col_schema(), two_col_rows(0..1_000), &index_options())?;

    std::thread::scope(|scope| {
        for worker in 1..5i64 {
            let table = table.clone();

            scope.spawn(move || {
                let rows = two_col_rows(worker * 1_000..(worker + 1) * 1_000);
                table
                    .write(&two_col_schema(), rows, &index_options())
                    .expect("write failed");
            });
        }
    });

    assert_eq!(5_000, table.count()?);

    Ok(())
}

#[test]
fn reader_never_observes_a_partial_commit() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = open_memory_table(folder.path(), 1_000)?;

    const BATCH: i64 = 500;
    const BATCHES: i64 = 10;

    std::thread::scope(|scope| {
        let writer = table.clone();

        let handle = scope.spawn(move || {
            for batch in 0..BATCHES {
                writer
                    .write(
                        &two_col_schema(),
                        two_col_rows(batch * BATCH..(batch + 1) * BATCH),
                        &index_options(),
                    )
                    .expect("write failed");
            }
        });

        // every observed count is a whole number of committed batches
        while !handle.is_finished() {
            let count = table.count().expect("count failed");
            assert_eq!(
                0,
                count % BATCH as u64,
                "observed a partial commit: {count}"
            );
        }
    });

    assert_eq!((BATCH * BATCHES) as u64, table.count()?);

    Ok(())
}
