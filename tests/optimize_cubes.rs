mod common;

use common::{index_options, open_memory_table, sorted_rows, two_col_rows, two_col_schema};
use test_log::test;

/// The first batch covers the full key domain, so the small appends that
/// fragment the tree never trigger a revision upgrade.
fn fragmented_table(
    folder: &std::path::Path,
    appends: i64,
    batch: i64,
) -> otree::Result<otree::Table> {
    let table = otree::Config::new(folder)
        .default_cube_size(1_000)
        .compaction_file_sizes(1_024 * 1_024, 1_024 * 1_024 * 1_024)
        .open(std::sync::Arc::new(otree::MemoryLog::default()))?;

    let schema = two_col_schema();

    table.write(&schema, two_col_rows(0..1_000), &index_options())?;

    for n in 0..appends {
        let from = 1_000 + n * batch;
        table.write(&schema, two_col_rows(from..from + batch), &index_options())?;
    }

    Ok(table)
}

#[test]
fn optimize_consolidates_fragmented_cubes() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = fragmented_table(folder.path(), 9, 300)?;

    const TOTAL: i64 = 1_000 + 9 * 300;

    assert_eq!(
        1,
        table.latest_revision()?.expect("revision").revision_id(),
        "appends must not upgrade the revision"
    );

    let before = table.snapshot()?;
    let files_before = before.blocks().count();
    assert!(files_before >= 10);

    let report = table.analyze(1)?;
    assert!(!report.cubes.is_empty(), "analyze found nothing to rewrite");

    table.optimize(1, &report.cubes)?;

    let after = table.snapshot()?;

    // aggregate rows unchanged
    assert_eq!(TOTAL as u64, after.total_elements());

    // file count non-increasing
    let files_after = after.blocks().count();
    assert!(
        files_after <= files_before,
        "optimize grew the file count: {files_before} -> {files_after}"
    );

    // the data survived
    let read_back = table.scan()?.collect::<otree::Result<Vec<_>>>()?;
    assert_eq!(sorted_rows(two_col_rows(0..TOTAL)), sorted_rows(read_back));

    // and the tree is still sound
    let state = after.index_state(1)?;
    let invariants = state.check_invariants();
    assert!(invariants.is_ok(), "{invariants:?}");

    Ok(())
}

#[test]
fn optimize_moves_cube_fills_toward_capacity() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = fragmented_table(folder.path(), 7, 250)?;

    let report = table.analyze(1)?;
    if report.cubes.is_empty() {
        return Ok(());
    }

    table.optimize(1, &report.cubes)?;

    let state = table.snapshot()?.index_state(1)?;

    // consolidation re-caps interior cubes at the revision's target
    for (cube, status) in state.iter() {
        if !status.max_weight.is_unbounded() {
            assert!(
                status.element_count <= 1_000,
                "cube {cube} still holds {} rows",
                status.element_count,
            );
        }
    }

    Ok(())
}

#[test]
fn optimize_unknown_revision_fails() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = open_memory_table(folder.path(), 1_000)?;

    table.write(&two_col_schema(), two_col_rows(0..100), &index_options())?;

    let result = table.optimize(9, &[otree::CubeId::root(2)]);
    assert!(matches!(result, Err(otree::Error::UnknownRevision(9))));

    Ok(())
}

#[test]
fn optimize_unknown_cube_fails() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = open_memory_table(folder.path(), 1_000)?;

    // 100 rows fit in the root, so no child cube exists
    table.write(&two_col_schema(), two_col_rows(0..100), &index_options())?;

    let missing = otree::CubeId::root(2).child(0);

    let result = table.optimize(1, &[missing.clone()]);
    assert!(matches!(
        result,
        Err(otree::Error::UnknownCube(cube)) if cube == missing
    ));

    Ok(())
}

#[test]
fn analyze_announces_its_proposal() -> otree::Result<()> {
    let folder = tempfile::tempdir()?;
    let table = fragmented_table(folder.path(), 5, 200)?;

    let report = table.analyze(1)?;
    assert!(!report.cubes.is_empty());

    // the proposal is in the log and overlays the state
    let snapshot = table.snapshot()?;
    let (announced, ts) = snapshot.announced(1);
    assert!(!announced.is_empty());
    assert!(ts.is_some());

    let state = snapshot.index_state(1)?;
    let announced_in_state = state
        .iter()
        .filter(|(_, status)| status.state == otree::CubeState::Announced)
        .count();
    assert!(announced_in_state > 0);

    // optimize resolves what it covered
    table.optimize(1, &report.cubes)?;

    let (remaining, _) = table.snapshot()?.announced(1);
    for cube in &report.cubes {
        assert!(!remaining.contains(cube));
    }

    Ok(())
}
