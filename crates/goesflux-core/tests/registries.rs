use goesflux_core::tasks::{all_tasks, CREATE_ANNOTATIONS_TASK, IMPORT_TIMESERIES_TASK};

#[test]
fn task_registry_is_populated() {
    let codes: Vec<&str> = all_tasks().iter().map(|task| task.code_identifier()).collect();

    assert!(
        codes.contains(&IMPORT_TIMESERIES_TASK),
        "expected time-series import task to be registered"
    );
    assert!(
        codes.contains(&CREATE_ANNOTATIONS_TASK),
        "expected annotation task to be registered"
    );
    assert_eq!(codes.len(), 2);
}
