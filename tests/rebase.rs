mod common;

use common::{index_options, open_memory_table, sorted_rows, two_col_rows, two_col_schema};
use otree::{Commit, CommitOutcome, LogStore, MemoryLog};
use test_log::test;

#[test]
fn log_rejects_stale_versions() -> otree::Result<()> {
    let log = MemoryLog::default();

    log.try_commit(Commit {
        version: 0,
        records: vec![],
    })?;

    // a writer that planned against the empty log loses
    let outcome = log.try_commit(Commit {
        version: 0,
        records: vec![],
    })?;
    assert_eq!(CommitOutcome::Conflict, outcome);

    Ok(())
}

#[test]
fn rebased_write_produces_the_same_content_as_a_fresh_one() -> otree::Result<()> {
    // Two tables, same configuration and data: one takes the writes
    // sequentially, the other interleaves a conflicting writer. The
    // resulting tag sets must agree modulo file names.
    let folder_a = tempfile::tempdir()?;
    let folder_b = tempfile::tempdir()?;

    let sequential = open_memory_table(folder_a.path(), 500)?;
    let racing = open_memory_table(folder_b.path(), 500)?;

    let schema = two_col_schema();
    let first = two_col_rows(0..2_000);
    let second = two_col_rows(2_000..4_000);

    sequential.write(&schema, first.clone(), &index_options())?;
    sequential.write(&schema, second.clone(), &index_options())?;

    racing.write(&schema, first, &index_options())?;

    // the racing writer gets forced through the conflict path
    std::thread::scope(|scope| {
        let t1 = racing.clone();
        let t2 = racing.clone();
        let second_clone = second.clone();

        scope.spawn(move || {
            t1.write(&two_col_schema(), second_clone, &index_options())
                .expect("racing write failed");
        });

        scope.spawn(move || {
            // a no-op-ish concurrent commit to trigger version races
            let _ = t2.analyze(1);
        });
    });

    // indexing is pure: both tables agree on every cube's row count
    let state_a = sequential.snapshot()?.index_state(1)?;
    let state_b = racing.snapshot()?.index_state(1)?;

    let mut cubes_a = state_a
        .iter()
        .map(|(cube, status)| (cube.clone(), status.element_count))
        .collect::<Vec<_>>();
    let mut cubes_b = state_b
        .iter()
        .map(|(cube, status)| (cube.clone(), status.element_count))
        .collect::<Vec<_>>();

    cubes_a.sort();
    cubes_b.sort();
    assert_eq!(cubes_a, cubes_b);

    // and on the data itself
    let rows_a = sequential.scan()?.collect::<otree::Result<Vec<_>>>()?;
    let rows_b = racing.scan()?.collect::<otree::Result<Vec<_>>>()?;
    assert_eq!(sorted_rows(rows_a), sorted_rows(rows_b));

    Ok(())
}
