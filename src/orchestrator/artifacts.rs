//! Files derived from the plan before launch
//!
//! - one work-item list per client instance, striped across all instances
//! - `testConfig.json`, the resolved plan

use std::path::{Path, PathBuf};

use crate::common::{paths, Error, Result};
use crate::testenv::{keys, ClientSpec, TestPlan};

/// Deal `items` round-robin to `consumers` lists: item `i` goes to list
/// `i % consumers`. Zero consumers get nothing.
pub fn stripe<T: Clone>(items: &[T], consumers: usize) -> Vec<Vec<T>> {
    let mut lists = vec![Vec::new(); consumers];
    if consumers == 0 {
        return lists;
    }
    for (i, item) in items.iter().enumerate() {
        lists[i % consumers].push(item.clone());
    }
    lists
}

/// Items served by one server: `<prefix><iServer:02>:Count<n:02>`
///
/// A server without `TEST_PV_PREFIX` serves no items.
pub fn server_work_items(server: &ClientSpec) -> Result<Vec<String>> {
    let Some(prefix) = server.env.get(keys::TEST_PV_PREFIX) else {
        return Ok(Vec::new());
    };
    let n_servers = server.count(keys::TEST_N_SERVERS)?.unwrap_or(1);
    let n_counters = server.count(keys::TEST_N_COUNTERS)?.unwrap_or(0);
    if n_servers.checked_mul(n_counters).is_none() {
        let value = server.env.get(keys::TEST_N_COUNTERS).map_or("", String::as_str);
        return Err(Error::invalid_number(&server.name, keys::TEST_N_COUNTERS, value));
    }

    let mut items = Vec::new();
    for i_server in 0..n_servers {
        for n in 0..n_counters {
            items.push(format!("{prefix}{i_server:02}:Count{n:02}"));
        }
    }
    Ok(items)
}

/// Sorted items of every server; servers with bad counts are skipped
pub fn all_work_items(plan: &TestPlan) -> Vec<String> {
    let mut items = Vec::new();
    for server in &plan.servers {
        match server_work_items(server) {
            Ok(server_items) => {
                tracing::debug!(client = %server.name, count = server_items.len(), "Work items");
                items.extend(server_items);
            }
            Err(e) => tracing::warn!(client = %server.name, "Skipping work items: {}", e),
        }
    }
    items.sort();
    items
}

/// One client instance and its list file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInstance {
    pub client: String,
    pub index: usize,
    pub list_path: PathBuf,
}

/// Client instances in stable order; each client contributes
/// `TEST_N_CLIENTS` (default 1). Clients without host or with a bad count
/// are skipped.
pub fn client_instances(plan: &TestPlan) -> Vec<ClientInstance> {
    let mut instances = Vec::new();
    for client in &plan.clients {
        let Some(host) = client.host.as_deref() else {
            tracing::warn!(client = %client.name, "No TEST_HOST, skipping work item list");
            continue;
        };
        let count = match client.count(keys::TEST_N_CLIENTS) {
            Ok(count) => count.unwrap_or(1),
            Err(e) => {
                tracing::warn!(client = %client.name, "Skipping work item list: {}", e);
                continue;
            }
        };
        for index in 0..count {
            instances.push(ClientInstance {
                client: client.name.clone(),
                index,
                list_path: paths::client_instance_list(plan.test_root(), host, &client.name, index),
            });
        }
    }
    instances
}

fn write_list(path: &Path, list: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::file_write(dir, e))?;
    }
    let mut content = list.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(path, content).map_err(|e| Error::file_write(path, e))
}

/// Write every client instance's work item list
///
/// An instance whose list cannot be written is logged and skipped. Returns
/// the lists written.
pub fn write_client_lists(plan: &TestPlan) -> Vec<PathBuf> {
    let items = all_work_items(plan);
    let instances = client_instances(plan);
    let lists = stripe(&items, instances.len());

    let mut written = Vec::with_capacity(instances.len());
    for (instance, list) in instances.into_iter().zip(lists) {
        let path = instance.list_path;
        if let Err(e) = write_list(&path, &list) {
            tracing::warn!(client = %instance.client, instance = instance.index, "{}", e);
            continue;
        }
        tracing::debug!(
            client = %instance.client,
            instance = instance.index,
            items = list.len(),
            path = %path.display(),
            "Wrote work item list"
        );
        written.push(path);
    }
    written
}

/// Write the resolved plan to `<testRoot>/testConfig.json`
pub fn write_snapshot(plan: &TestPlan) -> Result<PathBuf> {
    let path = plan.test_root().join(paths::TEST_CONFIG_JSON);
    let json = serde_json::to_string_pretty(plan)?;
    std::fs::write(&path, json).map_err(|e| Error::file_write(&path, e))?;
    Ok(path)
}

/// Write all derived artifacts. Failures are logged, not propagated.
pub fn materialize(plan: &TestPlan) {
    let lists = write_client_lists(plan);
    tracing::info!("Wrote {} work item lists", lists.len());
    match write_snapshot(plan) {
        Ok(path) => tracing::debug!("Wrote {}", path.display()),
        Err(e) => tracing::warn!("Could not write config snapshot: {}", e),
    }
}

/// Check `lists` partition `items` exactly
#[cfg(test)]
fn is_partition(items: &[usize], lists: &[Vec<usize>]) -> bool {
    let mut seen: Vec<usize> = lists.iter().flatten().copied().collect();
    seen.sort_unstable();
    seen == items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenv::Cascade;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_stripe_partitions() {
        for n in [0usize, 1, 7, 100] {
            let items: Vec<usize> = (0..n).collect();
            for k in [1usize, 3, 10] {
                let lists = stripe(&items, k);
                assert_eq!(lists.len(), k);
                assert!(is_partition(&items, &lists), "n={n} k={k}");
                // Sizes differ by at most one
                let max = lists.iter().map(Vec::len).max().unwrap_or(0);
                let min = lists.iter().map(Vec::len).min().unwrap_or(0);
                assert!(max - min <= 1, "n={n} k={k}");
            }
        }
    }

    #[test]
    fn test_stripe_is_modular() {
        let lists = stripe(&["a", "b", "c", "d", "e"], 2);
        assert_eq!(lists, vec![vec!["a", "c", "e"], vec!["b", "d"]]);
        assert!(stripe(&[1, 2, 3], 0).is_empty());
    }

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (name, content) in files {
            fs::write(root.join(name), content).unwrap();
        }
    }

    #[test]
    fn test_client_lists_cover_all_items() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("gwTest");
        fs::create_dir(&root).unwrap();
        write_tree(
            &root,
            &[
                ("test.env", "TEST_HOST=node1\n"),
                (
                    "pvServer.env",
                    "TEST_PV_PREFIX=PVT:\nTEST_N_SERVERS=2\nTEST_N_COUNTERS=3\n",
                ),
                ("clientA.env", "TEST_N_CLIENTS=2\n"),
                ("clientB.env", "TEST_HOST=node2\n"),
            ],
        );

        let plan = TestPlan::load(&Cascade::new(dir.path(), &root)).unwrap();
        let written = write_client_lists(&plan);
        assert_eq!(
            written,
            vec![
                root.join("node1/clients/clientA00/pvs.list"),
                root.join("node1/clients/clientA01/pvs.list"),
                root.join("node2/clients/clientB00/pvs.list"),
            ]
        );

        let mut all: Vec<String> = written
            .iter()
            .flat_map(|p| {
                fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort();
        assert_eq!(all, all_work_items(&plan));
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], "PVT:00:Count00");
        assert_eq!(
            fs::read_to_string(&written[0]).unwrap(),
            "PVT:00:Count00\nPVT:01:Count00\n"
        );
    }

    #[test]
    fn test_bad_server_count_is_skipped() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[
                ("aServer.env", "TEST_PV_PREFIX=A:\nTEST_N_COUNTERS=two\n"),
                ("bServer.env", "TEST_PV_PREFIX=B:\nTEST_N_COUNTERS=1\n"),
            ],
        );
        let plan = TestPlan::load(&Cascade::new(dir.path(), dir.path())).unwrap();
        assert_eq!(all_work_items(&plan), vec!["B:00:Count00"]);
    }

    #[test]
    fn test_unwritable_instance_does_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        write_tree(
            dir.path(),
            &[
                ("pvServer.env", "TEST_PV_PREFIX=P:\nTEST_N_COUNTERS=2\n"),
                ("clientA.env", "TEST_HOST=node1\n"),
                ("clientB.env", "TEST_HOST=node2\n"),
            ],
        );
        // A plain file where node1's directory should go
        fs::write(dir.path().join("node1"), "").unwrap();

        let plan = TestPlan::load(&Cascade::new(dir.path(), dir.path())).unwrap();
        let written = write_client_lists(&plan);
        let list = dir.path().join("node2/clients/clientB00/pvs.list");
        assert_eq!(written, vec![list.clone()]);
        assert_eq!(fs::read_to_string(list).unwrap(), "P:00:Count01\n");
    }

    #[test]
    fn test_item_count_overflow_is_rejected() {
        let dir = tempdir().unwrap();
        let huge = usize::MAX.to_string();
        write_tree(
            dir.path(),
            &[(
                "pvServer.env",
                &format!("TEST_PV_PREFIX=P:\nTEST_N_SERVERS={huge}\nTEST_N_COUNTERS=2\n"),
            )],
        );
        let plan = TestPlan::load(&Cascade::new(dir.path(), dir.path())).unwrap();
        let err = server_work_items(&plan.servers[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidNumber { .. }));
        assert!(all_work_items(&plan).is_empty());
    }

    #[test]
    fn test_snapshot() {
        let dir = tempdir().unwrap();
        write_tree(dir.path(), &[("clientB.env", "TEST_HOST=node3\nTEST_DURATION=5\n")]);
        let plan = TestPlan::load(&Cascade::new(dir.path(), dir.path())).unwrap();
        let path = write_snapshot(&plan).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["clients"][0]["name"], "clientB");
        assert_eq!(json["clients"][0]["role"], "client");
        assert_eq!(json["clients"][0]["duration_secs"], 5.0);
        assert_eq!(json["clients"][0]["env"]["TEST_HOST"], "node3");
        assert!(json["servers"].as_array().unwrap().is_empty());
    }
}
