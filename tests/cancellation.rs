mod common;

use common::{index_options, open_memory_table, two_col_rows, two_col_schema};
use otree::StopSignal;
use test_log::test;

#[test]
fn cancelled_write_commits_nothing_and_leaves_no_files() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = open_memory_table(folder.path(), 1_000)?;

    let stop = StopSignal::default();
    stop.cancel();

    let result = table.write_cancellable(
        &two_col_schema(),
        two_col_rows(0..10_000),
        &index_options(),
        &stop,
    );

    assert!(matches!(result, Err(otree::Error::WriteCancelled)));

    // no commit, no files
    assert_eq!(0, table.count()?);
    assert_eq!(None, table.snapshot()?.version());
    assert_eq!(0, std::fs::read_dir(folder.path())?.count());

    Ok(())
}

#[test]
fn cancellation_does_not_poison_the_table() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = open_memory_table(folder.path(), 1_000)?;

    let stop = StopSignal::default();
    stop.cancel();

    let _ = table.write_cancellable(
        &two_col_schema(),
        two_col_rows(0..100),
        &index_options(),
        &stop,
    );

    // a later write with a fresh signal goes through
    table.write(&two_col_schema(), two_col_rows(0..100), &index_options())?;
    assert_eq!(100, table.count()?);

    Ok(())
}
