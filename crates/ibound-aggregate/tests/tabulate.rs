use std::path::Path;

use ibound_aggregate::StopReason;
use ibound_aggregate::tabulate::tabulate_dir;
use ibound_config::{BoundFamily, Strategy, TargetId};

fn schedules(n: u64, buggy_at: &[u64]) -> String {
  let mut log = String::from("sched_app 1 sched_race 1\n");
  for i in 1..=n {
    log.push_str("Starting execution\n");
    if buggy_at.contains(&i) {
      log.push_str("ERROR: deadlock\n");
    }
    log.push_str(&format!("finished execution {}\n", i));
  }
  log
}

fn write(dir: &Path, name: &str, content: &str) {
  std::fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn test_tabulate_family_and_chunked_random_run() {
  let dir = tempfile::tempdir().unwrap();
  let logs = dir.path().join("use1");
  std::fs::create_dir_all(&logs).unwrap();

  write(&logs, "2013-08-30-00-00-00--chess--WSQ--db--0--.txt", &schedules(3, &[]));
  write(&logs, "2013-08-30-00-00-01--chess--WSQ--db--1--.txt", &schedules(5, &[5]));
  write(&logs, "2013-08-30-00-00-02--chess--WSQ--db--2--.txt", &schedules(5, &[5]));
  // Older duplicate of bound 1 that must be ignored.
  write(&logs, "2013-08-29-00-00-00--chess--WSQ--db--1--.txt", &schedules(9, &[]));

  write(&logs, "2013-08-30-00-00-03--chess--WSQ--random--0,7,0--.txt", &schedules(4, &[]));
  write(&logs, "2013-08-30-00-00-04--chess--WSQ--random--0,7,4--.txt", &schedules(4, &[2, 3]));
  write(dir.path(), "README.txt", "not a log");

  let tab = tabulate_dir(dir.path(), 8).await.unwrap();

  assert_eq!(tab.families.len(), 1);
  let family = &tab.families[0];
  assert_eq!(family.target, TargetId::new("chess", "WSQ"));
  assert_eq!(family.family, BoundFamily::Delay);
  let counts: Vec<u64> = family.iterative.iter().map(|r| r.iterative_num_schedules).collect();
  assert_eq!(counts, vec![3, 5, 5]);
  assert_eq!(family.first_buggy_bound, Some(1));
  assert_eq!(family.schedules_to_first_bug(), Some(5));
  assert_eq!(family.stop_reason, Some(StopReason::Saturated));

  assert_eq!(tab.flat.len(), 1);
  let random = &tab.flat[0];
  assert_eq!(random.strategy, Strategy::Random { seed: 7 });
  assert_eq!(random.result.num_schedules, 8);
  assert_eq!(random.result.num_buggy, 2);
  assert_eq!(random.schedules_to_first_bug(), Some(6));
  assert_eq!(random.result.predicted_to_bug(8), Some(4.0));
}

#[tokio::test]
async fn test_tabulate_rejects_bound_gap() {
  let dir = tempfile::tempdir().unwrap();
  write(dir.path(), "2013-08-30-00-00-00--chess--WSQ--pb--0--.txt", &schedules(2, &[]));
  write(dir.path(), "2013-08-30-00-00-01--chess--WSQ--pb--2--.txt", &schedules(4, &[]));

  assert!(tabulate_dir(dir.path(), 100).await.is_err());
}
