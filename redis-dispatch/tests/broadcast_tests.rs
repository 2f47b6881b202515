//! Broadcast dispatch and slot routing over three fake primaries

mod common;

use common::{cluster, Fault};
use redis_dispatch::{
    calculate_slot, CommandPolicy, ErrorKind, FailureTolerance, RedisError, ResponsePolicy,
};
use std::collections::HashSet;

fn seed_keys(servers: &[std::sync::Arc<common::FakeServer>]) {
    servers[0].seed("a1", "1");
    servers[0].seed("a2", "2");
    servers[1].seed("b1", "1");
    servers[1].seed("b2", "2");
    servers[1].seed("b3", "3");
    servers[2].seed("c1", "1");
}

#[tokio::test]
async fn test_dbsize_sums_every_primary() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    seed_keys(&servers);

    assert_eq!(client.nodes().len(), 3);
    assert_eq!(client.broadcast(&cmds.dbsize()).await.unwrap(), 6);
}

#[tokio::test]
async fn test_keys_concatenates_every_primary() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    seed_keys(&servers);

    let keys: HashSet<String> = client
        .broadcast(&cmds.keys("*"))
        .await
        .unwrap()
        .into_iter()
        .collect();
    let expected: HashSet<String> = ["a1", "a2", "b1", "b2", "b3", "c1"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn test_flushall_reaches_every_primary() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    seed_keys(&servers);

    assert_eq!(client.broadcast(&cmds.flushall()).await.unwrap(), "OK");
    for server in &servers {
        assert_eq!(server.key_count(), 0);
        assert_eq!(server.writes(), vec![vec!["FLUSHALL"]]);
    }
}

#[tokio::test]
async fn test_best_effort_skips_failed_node() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    seed_keys(&servers);
    servers[1].set_fault(Some(Fault::Down));

    let policy = CommandPolicy::all_primaries(ResponsePolicy::Sum)
        .with_tolerance(FailureTolerance::BestEffort);
    let outcome = client.broadcast_with(&cmds.dbsize(), policy).await.unwrap();

    assert_eq!(outcome.value, 3);
    assert!(!outcome.is_complete());
    assert_eq!(outcome.failed.len(), 1);
    assert!(outcome.failed[&servers[1].node()].is_transport());
}

#[tokio::test]
async fn test_fail_fast_reports_partial_failure() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    seed_keys(&servers);
    servers[1].set_fault(Some(Fault::Down));

    match client.broadcast(&cmds.dbsize()).await {
        Err(RedisError::Broadcast(err)) => {
            assert!(err.is_partial());
            assert!(!err.is_total());
            assert_eq!(err.total, 3);
            assert_eq!(
                err.failures.keys().cloned().collect::<Vec<_>>(),
                vec![servers[1].node()]
            );
        }
        other => panic!("expected a partial broadcast failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_reply_counts_as_node_failure() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    servers[2].set_fault(Some(Fault::ErrorReply("BUSY script running".to_string())));

    match client.broadcast(&cmds.flushall()).await {
        Err(RedisError::Broadcast(err)) => {
            assert!(err.is_partial());
            let failure = &err.failures[&servers[2].node()];
            assert_eq!(failure.server_code(), Some("BUSY"));
        }
        other => panic!("expected a partial broadcast failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_every_node_down_is_total_failure() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    for server in &servers {
        server.set_fault(Some(Fault::Down));
    }

    let policy = CommandPolicy::all_primaries(ResponsePolicy::Sum)
        .with_tolerance(FailureTolerance::BestEffort);
    let err = client.broadcast_with(&cmds.dbsize(), policy).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport, "no node was reachable");
    assert!(err.is_transport());
    match err {
        RedisError::Broadcast(err) => {
            assert!(err.is_total());
            assert_eq!(err.failures.len(), 3);
        }
        other => panic!("expected a total broadcast failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_per_node_results_keep_failures() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();
    seed_keys(&servers);
    servers[0].set_fault(Some(Fault::Down));

    let results = client.broadcast_per_node(&cmds.dbsize()).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[&servers[0].node()].is_err());
    assert_eq!(*results[&servers[1].node()].as_ref().unwrap(), 3);
    assert_eq!(*results[&servers[2].node()].as_ref().unwrap(), 1);
}

#[tokio::test]
async fn test_keyed_command_is_not_broadcast() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();

    assert_eq!(client.broadcast(&cmds.set("user:1", "ada")).await.unwrap(), "OK");
    let holders = servers
        .iter()
        .filter(|server| server.string("user:1").is_some())
        .count();
    assert_eq!(holders, 1);
}

#[tokio::test]
async fn test_commands_route_to_slot_owner() {
    let (servers, client) = cluster(3);
    let cmds = client.commands();

    for key in ["alpha", "beta", "gamma", "delta", "{user}.name", "{user}.mail"] {
        client.execute(&cmds.set(key, key)).await.unwrap();
        let owner = usize::from(calculate_slot(key.as_bytes()) / (16384 / 3)).min(2);
        assert_eq!(servers[owner].string(key), Some(key.to_string()), "{key}");
    }

    let tagged = client
        .execute(&cmds.mget(["{user}.name", "{user}.mail"]))
        .await
        .unwrap();
    assert_eq!(
        tagged,
        vec![Some("{user}.name".to_string()), Some("{user}.mail".to_string())]
    );
}

#[tokio::test]
async fn test_cross_slot_command_rejected() {
    let (_servers, client) = cluster(3);
    let cmds = client.commands();

    let err = client.execute(&cmds.mget(["a", "b"])).await.unwrap_err();
    assert!(matches!(err, RedisError::Cluster(ref msg) if msg.starts_with("CROSSSLOT")));
}
