mod common;

use common::{index_options, sorted_rows, two_col_rows, two_col_schema};
use otree::{Config, DirectoryLog};
use std::sync::Arc;
use test_log::test;

#[test]
fn table_over_a_directory_log_round_trips() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let log = Arc::new(DirectoryLog::create(folder.path().join("_log"))?);

    let table = Config::new(folder.path())
        .default_cube_size(500)
        .open(log)?;

    let rows = two_col_rows(0..5_000);
    table.write(&two_col_schema(), rows.clone(), &index_options())?;

    assert_eq!(5_000, table.count()?);

    let read_back = table.scan()?.collect::<otree::Result<Vec<_>>>()?;
    assert_eq!(sorted_rows(rows), sorted_rows(read_back));

    let sample = table.sample(0.2)?.collect::<otree::Result<Vec<_>>>()?;
    assert!((600..=1_400).contains(&sample.len()));

    Ok(())
}

#[test]
fn index_is_reconstructible_from_the_log_alone() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let log = Arc::new(DirectoryLog::create(folder.path().join("_log"))?);
        let table = Config::new(folder.path())
            .default_cube_size(500)
            .open(log)?;

        table.write(
            &two_col_schema(),
            two_col_rows(0..3_000),
            &index_options(),
        )?;
        table.write(
            &two_col_schema(),
            two_col_rows(3_000..6_000),
            &index_options(),
        )?;
    }

    // a fresh process: everything comes back from the tags in the log
    let log = Arc::new(DirectoryLog::create(folder.path().join("_log"))?);
    let table = Config::new(folder.path()).open(log)?;

    assert_eq!(6_000, table.count()?);

    let revision = table.latest_revision()?.expect("revision should exist");
    assert_eq!(1, revision.revision_id());

    let state = table.snapshot()?.index_state(1)?;
    let invariants = state.check_invariants();
    assert!(invariants.is_ok(), "{invariants:?}");

    let read_back = table.scan()?.collect::<otree::Result<Vec<_>>>()?;
    assert_eq!(sorted_rows(two_col_rows(0..6_000)), sorted_rows(read_back));

    // appends keep working against the recovered state
    table.write(
        &two_col_schema(),
        two_col_rows(6_000..7_000),
        &index_options(),
    )?;
    assert_eq!(7_000, table.count()?);

    Ok(())
}
