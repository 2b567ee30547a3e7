mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use common::{Call, MockRuntime};
use labu::controller::{ClientLaunchConfig, Controller, ControllerError};
use labu::results::{SummaryResult, Writer};

fn fixture() -> (tempfile::TempDir, Arc<MockRuntime>, Controller, PathBuf) {
    let root = tempfile::tempdir().expect("tempdir");
    let workspace = root.path().join("workspace");
    std::fs::create_dir_all(&workspace).expect("workspace dir");
    let client_dir = root.path().join("clients").join("alpha");
    std::fs::create_dir_all(&client_dir).expect("client dir");
    std::fs::write(client_dir.join("labu.yaml"), "role: full\n").expect("descriptor");
    let runtime = Arc::new(MockRuntime::new());
    let controller = Controller::new(workspace.clone(), runtime.clone());
    (root, runtime, controller, workspace)
}

fn alpha_config() -> ClientLaunchConfig {
    ClientLaunchConfig {
        client: "alpha".to_string(),
        ..ClientLaunchConfig::default()
    }
}

#[test]
fn ids_are_strictly_monotonic() {
    let (_root, _runtime, controller, _workspace) = fixture();

    let s1 = controller.create_suite("a", "");
    let s2 = controller.create_suite("b", "");
    assert_eq!((s1, s2), (1, 2));

    // The test counter is global, not per suite.
    let t1 = controller.create_test(s1, "t1", "").unwrap();
    let t2 = controller.create_test(s2, "t2", "").unwrap();
    let t3 = controller.create_test(s1, "t3", "").unwrap();
    assert_eq!((t1, t2, t3), (1, 2, 3));
}

#[test]
fn clients_are_loaded_from_the_descriptor_directory() {
    let (_root, _runtime, controller, _workspace) = fixture();
    let clients = controller.list_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].name, "alpha");
    assert_eq!(clients[0].meta.get("role"), Some(&serde_json::json!("full")));
}

#[tokio::test]
async fn unknown_ids_are_classified() {
    let (_root, _runtime, controller, _workspace) = fixture();

    assert!(matches!(
        controller.create_test(42, "t", ""),
        Err(ControllerError::SuiteNotFound)
    ));

    let s = controller.create_suite("a", "");
    assert!(matches!(
        controller.end_test(s, 9, SummaryResult::default()).await,
        Err(ControllerError::TestNotFound)
    ));

    let t = controller.create_test(s, "t", "").unwrap();
    let config = ClientLaunchConfig {
        client: "ghost".to_string(),
        ..ClientLaunchConfig::default()
    };
    assert!(matches!(
        controller.launch_node(s, t, config, &HashMap::new()).await,
        Err(ControllerError::UnknownClient)
    ));

    assert!(matches!(
        controller.end_suite(99),
        Err(ControllerError::SuiteNotFound)
    ));
}

#[tokio::test]
async fn end_test_snapshots_nodes_and_tears_them_down() {
    let (_root, runtime, controller, workspace) = fixture();

    let s = controller.create_suite("rpc", "");
    let t = controller.create_test(s, "a", "").unwrap();
    let first = controller
        .launch_node(s, t, alpha_config(), &HashMap::new())
        .await
        .unwrap();
    let second = controller
        .launch_node(s, t, alpha_config(), &HashMap::new())
        .await
        .unwrap();

    controller
        .end_test(
            s,
            t,
            SummaryResult {
                pass: true,
                details: "done".to_string(),
            },
        )
        .await
        .unwrap();

    for id in [&first.id, &second.id] {
        assert_eq!(
            runtime.count(|call| matches!(call, Call::Remove(c) if c == id)),
            1
        );
    }

    let writer = Writer::new(workspace.clone());
    controller.save_results(&writer).unwrap();
    let raw = std::fs::read_to_string(workspace.join("results").join(format!("suite-{s}.json")))
        .unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let case = &doc["testCases"][t.to_string().as_str()];
    assert_eq!(case["summaryResult"]["pass"], true);
    assert_eq!(case["summaryResult"]["details"], "done");
    assert_eq!(case["clientInfo"][first.id.as_str()]["name"], "alpha");
    assert_eq!(case["clientInfo"][second.id.as_str()]["ip"], "172.28.0.2");
    assert!(case["start"].as_str().unwrap() <= case["end"].as_str().unwrap());
}

#[tokio::test]
async fn network_create_is_idempotent() {
    let (_root, runtime, controller, _workspace) = fixture();

    controller.create_network("n1").await.unwrap();
    controller.create_network("n1").await.unwrap();
    assert_eq!(
        runtime.count(|call| matches!(call, Call::CreateNetwork(n) if n == "n1")),
        1
    );

    controller.remove_network("n1").await.unwrap();
    controller.remove_network("n1").await.unwrap();
    assert_eq!(
        runtime.count(|call| matches!(call, Call::RemoveNetwork(n) if n == "n1")),
        1
    );

    controller.create_network("n1").await.unwrap();
    assert_eq!(
        runtime.count(|call| matches!(call, Call::CreateNetwork(n) if n == "n1")),
        2
    );
}

#[test]
fn suite_result_outlives_the_suite() {
    let (_root, _runtime, controller, workspace) = fixture();

    let s = controller.create_suite("rpc", "compat checks");
    controller.end_suite(s).unwrap();
    assert!(matches!(
        controller.end_suite(s),
        Err(ControllerError::SuiteNotFound)
    ));

    let writer = Writer::new(workspace.clone());
    controller.save_results(&writer).unwrap();
    let raw = std::fs::read_to_string(workspace.join("results").join(format!("suite-{s}.json")))
        .unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["name"], "rpc");
    assert_eq!(doc["description"], "compat checks");
}

#[tokio::test]
async fn launch_stages_files_and_derives_environment() {
    let (root, runtime, controller, workspace) = fixture();
    let host = root.path().join("a.json");
    std::fs::write(&host, b"{\"seed\":7}").expect("host file");

    let s = controller.create_suite("rpc", "");
    let t = controller.create_test(s, "a", "").unwrap();
    let config = ClientLaunchConfig {
        client: "alpha".to_string(),
        networks: vec!["n1".to_string()],
        environment: HashMap::from([("EXTRA".to_string(), "v".to_string())]),
    };
    let files = HashMap::from([("a.json".to_string(), host)]);
    let node = controller.launch_node(s, t, config, &files).await.unwrap();
    assert_eq!(node.ip, "172.28.0.2");

    assert_eq!(
        runtime.count(|call| matches!(call, Call::Build { tag } if tag == "labu-client-alpha")),
        1
    );

    let (image, env, mounts, network) = runtime
        .calls()
        .into_iter()
        .find_map(|call| match call {
            Call::Run {
                image,
                env,
                mounts,
                network,
            } => Some((image, env, mounts, network)),
            _ => None,
        })
        .unwrap();
    assert_eq!(image, "labu-client-alpha");
    assert_eq!(env.get("LABU_FILES_DIR").map(String::as_str), Some("/labu-files"));
    assert_eq!(env.get("LABU_STATE_DIR").map(String::as_str), Some("/state"));
    assert_eq!(env.get("LABU_NETWORK").map(String::as_str), Some("n1"));
    assert_eq!(env.get("EXTRA").map(String::as_str), Some("v"));
    assert_eq!(network.as_deref(), Some("labu-net"));

    let node_dir = workspace.join("nodes").join("suite-1").join("test-1");
    assert_eq!(mounts, vec![format!("{}:/labu-files:ro", node_dir.display())]);
    assert_eq!(std::fs::read(node_dir.join("a.json")).unwrap(), b"{\"seed\":7}");
}

#[tokio::test]
async fn preset_network_variable_is_preserved() {
    let (_root, runtime, controller, _workspace) = fixture();

    let s = controller.create_suite("rpc", "");
    let t = controller.create_test(s, "a", "").unwrap();
    let config = ClientLaunchConfig {
        client: "alpha".to_string(),
        networks: vec!["n1".to_string()],
        environment: HashMap::from([("LABU_NETWORK".to_string(), "custom".to_string())]),
    };
    controller
        .launch_node(s, t, config, &HashMap::new())
        .await
        .unwrap();

    let t2 = controller.create_test(s, "b", "").unwrap();
    controller
        .launch_node(s, t2, alpha_config(), &HashMap::new())
        .await
        .unwrap();

    let networks: Vec<String> = runtime
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Run { env, .. } => env.get("LABU_NETWORK").cloned(),
            _ => None,
        })
        .collect();
    assert_eq!(networks, vec!["custom".to_string(), "devnet".to_string()]);
}

#[tokio::test]
async fn image_override_skips_the_build() {
    let (_root, runtime, controller, _workspace) = fixture();
    controller.set_image_overrides(HashMap::from([(
        "alpha".to_string(),
        "registry/alpha:ci".to_string(),
    )]));

    let s = controller.create_suite("rpc", "");
    let t = controller.create_test(s, "a", "").unwrap();
    controller
        .launch_node(s, t, alpha_config(), &HashMap::new())
        .await
        .unwrap();

    assert_eq!(runtime.count(|call| matches!(call, Call::Build { .. })), 0);
    assert_eq!(
        runtime.count(
            |call| matches!(call, Call::Run { image, .. } if image == "registry/alpha:ci")
        ),
        1
    );
}

#[tokio::test]
async fn node_info_falls_back_to_a_stub() {
    let (_root, _runtime, controller, _workspace) = fixture();

    let s = controller.create_suite("rpc", "");
    let t = controller.create_test(s, "a", "").unwrap();
    let node = controller
        .launch_node(s, t, alpha_config(), &HashMap::new())
        .await
        .unwrap();

    let known = controller.node_info(&node.id);
    assert_eq!(known.get("name").map(String::as_str), Some("alpha"));

    let unknown = controller.node_info("ghost");
    assert_eq!(
        unknown,
        HashMap::from([("id".to_string(), "ghost".to_string())])
    );
}

#[test]
fn client_versions_are_seeded_for_new_suites() {
    let (_root, _runtime, controller, workspace) = fixture();
    controller.set_client_versions(&["alpha".to_string(), "beta".to_string()]);

    let s = controller.create_suite("rpc", "");
    let writer = Writer::new(workspace.clone());
    controller.save_results(&writer).unwrap();

    let raw = std::fs::read_to_string(workspace.join("results").join(format!("suite-{s}.json")))
        .unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["clientVersions"]["alpha"], "");
    assert_eq!(doc["clientVersions"]["beta"], "");
}
