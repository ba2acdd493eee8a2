use super::*;
use crate::parameters::Parameters;
use tempfile::TempDir;

fn sample_run(id: &str) -> Run {
    let input = Parameters::new().with("workspace_id", "ws-1").unwrap();
    Run::new(RunId::new(id), "delete-workspace", input)
}

#[tokio::test]
async fn test_memory_store_create_is_first_writer_wins() {
    let store = MemoryRunStore::new();
    let run = sample_run("run-1");

    assert!(matches!(store.create_run(&run).await.unwrap(), CreateOutcome::Created));

    let mut duplicate = sample_run("run-1");
    duplicate.flight_type = "other".to_string();
    match store.create_run(&duplicate).await.unwrap() {
        CreateOutcome::Existing(existing) => assert_eq!(existing.flight_type, "delete-workspace"),
        CreateOutcome::Created => panic!("duplicate create must not overwrite"),
    }
}

#[tokio::test]
async fn test_memory_store_save_requires_existing_run() {
    let store = MemoryRunStore::new();
    let result = store.save_run(&sample_run("missing")).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_memory_store_list_by_status() {
    let store = MemoryRunStore::new();
    let running = sample_run("a");
    let mut done = sample_run("b");
    store.create_run(&running).await.unwrap();
    store.create_run(&done).await.unwrap();

    done.status = RunStatus::Succeeded;
    store.save_run(&done).await.unwrap();

    let in_flight = store.list_runs_by_status(&RunStatus::IN_FLIGHT).await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].id, RunId::new("a"));
}

#[tokio::test]
async fn test_file_store_create_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRunStore::new(temp_dir.path()).await.unwrap();

    let run = sample_run("run-1");
    assert!(matches!(store.create_run(&run).await.unwrap(), CreateOutcome::Created));

    let loaded = store.load_run(&run.id).await.unwrap().unwrap();
    assert_eq!(loaded.flight_type, "delete-workspace");
    assert_eq!(loaded.input(), run.input());
    assert!(store.run_path(&run.id, RunStatus::Running).exists());
}

#[tokio::test]
async fn test_file_store_duplicate_create_returns_existing() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRunStore::new(temp_dir.path()).await.unwrap();

    let run = sample_run("run-1");
    store.create_run(&run).await.unwrap();

    let outcome = store.create_run(&sample_run("run-1")).await.unwrap();
    assert!(matches!(outcome, CreateOutcome::Existing(existing) if existing.submitted_at == run.submitted_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_store_concurrent_create_has_one_winner() {
    let temp_dir = TempDir::new().unwrap();
    let store = std::sync::Arc::new(FileRunStore::new(temp_dir.path()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..100 {
        for writer in ["first", "second"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let input = Parameters::new().with("writer", writer).unwrap();
                let run = Run::new(RunId::new(format!("run-{}", i)), "delete-workspace", input);
                let outcome = store.create_run(&run).await;
                (i, writer, outcome)
            }));
        }
    }

    let mut winners: HashMap<u32, &str> = HashMap::new();
    let mut observed: Vec<(u32, String)> = Vec::new();
    for handle in handles {
        let (i, writer, outcome) = handle.await.unwrap();
        match outcome.unwrap() {
            CreateOutcome::Created => {
                assert!(winners.insert(i, writer).is_none(), "two writers created run-{}", i);
            }
            CreateOutcome::Existing(existing) => {
                observed.push((i, existing.input().get::<String>("writer").unwrap().unwrap()));
            }
        }
    }

    assert_eq!(winners.len(), 100);
    assert_eq!(observed.len(), 100);
    for (i, seen) in observed {
        assert_eq!(seen, winners[&i], "loser of run-{} saw another record", i);
    }
    for (i, writer) in &winners {
        let loaded = store.load_run(&RunId::new(format!("run-{}", i))).await.unwrap().unwrap();
        assert_eq!(loaded.input().get::<String>("writer").unwrap().unwrap(), *writer);
    }
}

#[tokio::test]
async fn test_file_store_finishes_creation_from_claim_marker() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRunStore::new(temp_dir.path()).await.unwrap();

    // A creator that linked its marker and then died before publishing.
    let run = sample_run("run-1");
    let staged = store.stage(&run).await.unwrap();
    std::fs::hard_link(&staged, store.marker_path(&run.id)).unwrap();
    std::fs::remove_file(&staged).unwrap();

    let mut late = sample_run("run-1");
    late.flight_type = "other".to_string();
    match store.create_run(&late).await.unwrap() {
        CreateOutcome::Existing(existing) => assert_eq!(existing.flight_type, "delete-workspace"),
        CreateOutcome::Created => panic!("claimed id must not be created twice"),
    }
    assert!(store.run_path(&run.id, RunStatus::Running).exists());
}

#[tokio::test]
async fn test_file_store_status_change_moves_file() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRunStore::new(temp_dir.path()).await.unwrap();

    let mut run = sample_run("run-1");
    store.create_run(&run).await.unwrap();

    run.status = RunStatus::Waiting;
    run.step_index = 2;
    store.save_run(&run).await.unwrap();
    assert!(!store.run_path(&run.id, RunStatus::Running).exists());
    assert!(store.run_path(&run.id, RunStatus::Waiting).exists());

    run.status = RunStatus::Succeeded;
    store.save_run(&run).await.unwrap();
    assert!(!store.run_path(&run.id, RunStatus::Waiting).exists());

    let loaded = store.load_run(&run.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Succeeded);
    assert_eq!(loaded.step_index, 2);
}

#[tokio::test]
async fn test_file_store_list_ignores_stale_copies() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRunStore::new(temp_dir.path()).await.unwrap();

    let mut run = sample_run("run-1");
    store.create_run(&run).await.unwrap();
    let stale = std::fs::read(store.run_path(&run.id, RunStatus::Running)).unwrap();

    run.status = RunStatus::Failed;
    run.updated_at = run.updated_at + chrono::Duration::seconds(1);
    store.save_run(&run).await.unwrap();

    // Simulate a crash between the rename and the cleanup.
    std::fs::write(store.run_path(&run.id, RunStatus::Running), stale).unwrap();

    assert!(store.list_runs_by_status(&[RunStatus::Running]).await.unwrap().is_empty());
    let failed = store.list_runs_by_status(&[RunStatus::Failed]).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(store.load_run(&run.id).await.unwrap().unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_file_store_persists_across_instances() {
    let temp_dir = TempDir::new().unwrap();
    let run = sample_run("run/with:odd chars");

    {
        let store = FileRunStore::new(temp_dir.path()).await.unwrap();
        store.create_run(&run).await.unwrap();
    }

    let store = FileRunStore::new(temp_dir.path()).await.unwrap();
    let loaded = store.load_run(&run.id).await.unwrap();
    assert!(loaded.is_some());
    assert!(matches!(store.create_run(&run).await.unwrap(), CreateOutcome::Existing(_)));
}

#[tokio::test]
async fn test_file_store_load_nonexistent() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRunStore::new(temp_dir.path()).await.unwrap();

    assert!(store.load_run(&RunId::generate()).await.unwrap().is_none());
}

#[test]
fn test_file_stem_encoding() {
    assert_eq!(file_stem(&RunId::new("abc-123")), "abc-123");
    assert_eq!(file_stem(&RunId::new("a/b")), "a%2Fb");
    assert_ne!(file_stem(&RunId::new("a_b")), file_stem(&RunId::new("a%5Fb")));
}
