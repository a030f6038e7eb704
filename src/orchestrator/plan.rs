//! Fixed phase sequences for each operation
//!
//! Builders are pure: they read a universe snapshot and the request and
//! return the ordered groups. Groups that would have nothing to run are
//! dropped.

use uuid::Uuid;

use crate::backend::{NodeAction, TlsSettings};
use crate::model::{
    NodeDetails, NodeState, Operation, ProviderType, ResizeNodeParams, ServerType,
    TlsToggleParams, Universe, UpgradeOption,
};
use crate::task::{SubTask, SubTaskGroup, SubTaskGroupType};

/// Name of the group every successful plan ends with
pub const MARK_SUCCESS_GROUP: &str = "MarkUniverseUpdateSuccess";

/// Build the ordered groups for an operation
///
/// `key_rotations` only matters for resume, where any prior rotation adds
/// a key activation phase after the masters are healthy.
pub fn build(operation: &Operation, universe: &Universe, key_rotations: u32) -> Vec<SubTaskGroup> {
    let groups = match operation {
        Operation::Resume(_) => resume(universe, key_rotations),
        Operation::ResizeNode(params) => resize(universe, params),
        Operation::TlsToggle(params) => tls_toggle(universe, params),
    };
    groups.into_iter().filter(|g| !g.is_empty()).collect()
}

fn names<'a>(nodes: impl IntoIterator<Item = &'a NodeDetails>) -> Vec<String> {
    nodes.into_iter().map(|n| n.node_name.clone()).collect()
}

fn each_node<'a>(
    name: &str,
    group_type: SubTaskGroupType,
    nodes: impl IntoIterator<Item = &'a NodeDetails>,
    action: NodeAction,
) -> SubTaskGroup {
    nodes
        .into_iter()
        .fold(SubTaskGroup::new(name, group_type), |group, node| {
            group.with(SubTask::node(node.node_name.clone(), vec![action.clone()]))
        })
}

fn wait_for(name: &str, nodes: Vec<String>, server: ServerType) -> SubTaskGroup {
    let group = SubTaskGroup::new(name, SubTaskGroupType::WaitingForServers);
    if nodes.is_empty() {
        return group;
    }
    group.with(SubTask::WaitForServers { nodes, server })
}

fn set_live(name: &str, nodes: Vec<String>) -> SubTaskGroup {
    let group = SubTaskGroup::new(name, SubTaskGroupType::ConfigureUniverse);
    if nodes.is_empty() {
        return group;
    }
    group.with(SubTask::SetNodeState {
        nodes,
        state: NodeState::Live,
    })
}

fn mark_success() -> SubTaskGroup {
    SubTaskGroup::new(MARK_SUCCESS_GROUP, SubTaskGroupType::ConfigureUniverse)
        .with(SubTask::MarkUpdateSuccess)
}

fn resume(universe: &Universe, key_rotations: u32) -> Vec<SubTaskGroup> {
    let nodes = &universe.details.nodes;
    let mut groups = Vec::new();

    if !universe.details.imported {
        groups.push(each_node(
            "ResumeServers",
            SubTaskGroupType::ResumingUniverse,
            nodes,
            NodeAction::ResumeServer,
        ));
    }

    if universe.provider_type() == Some(ProviderType::Azure) {
        groups.push(each_node(
            "CollectServerInfo",
            SubTaskGroupType::ConfigureUniverse,
            nodes,
            NodeAction::CollectServerInfo,
        ));
    }

    groups.push(each_node(
        "StartMasters",
        SubTaskGroupType::StartingNodeProcesses,
        universe.masters(),
        NodeAction::StartServer(ServerType::Master),
    ));
    groups.push(wait_for("WaitForMasters", names(universe.masters()), ServerType::Master));

    if key_rotations > 0 {
        groups.push(
            SubTaskGroup::new("ActivateUniverseKeys", SubTaskGroupType::ConfigureUniverse)
                .with(SubTask::ActivateUniverseKeys),
        );
    }

    for tserver in universe.tservers() {
        groups.push(each_node(
            &format!("StartTServer-{}", tserver.node_name),
            SubTaskGroupType::StartingNodeProcesses,
            [tserver],
            NodeAction::StartServer(ServerType::Tserver),
        ));
    }
    groups.push(wait_for("WaitForTServers", names(universe.tservers()), ServerType::Tserver));

    groups.push(set_live(
        "SetNodesLive",
        names(nodes.iter().filter(|n| n.has_server_role())),
    ));
    groups.push(
        SubTaskGroup::new("UpdateAlertDefinitions", SubTaskGroupType::ConfigureUniverse)
            .with(SubTask::UpdateAlertDefinitions),
    );
    groups.push(
        SubTaskGroup::new("UpdateMonitoringTargets", SubTaskGroupType::ConfigureUniverse)
            .with(SubTask::UpdateMonitoringTargets),
    );
    groups.push(mark_success());
    groups
}

fn stop_actions(node: &NodeDetails) -> Vec<NodeAction> {
    let mut actions = Vec::new();
    if node.is_tserver {
        actions.push(NodeAction::StopServer(ServerType::Tserver));
    }
    if node.is_master {
        actions.push(NodeAction::StopServer(ServerType::Master));
    }
    actions
}

fn start_actions(node: &NodeDetails) -> Vec<NodeAction> {
    let mut actions = Vec::new();
    if node.is_master {
        actions.push(NodeAction::StartServer(ServerType::Master));
    }
    if node.is_tserver {
        actions.push(NodeAction::StartServer(ServerType::Tserver));
    }
    actions
}

fn server_types(node: &NodeDetails) -> Vec<ServerType> {
    let mut servers = Vec::new();
    if node.is_master {
        servers.push(ServerType::Master);
    }
    if node.is_tserver {
        servers.push(ServerType::Tserver);
    }
    servers
}

/// Stop, reconfigure, restart, wait and mark one node live
fn rolling_node(
    node: &NodeDetails,
    phase: &str,
    group_type: SubTaskGroupType,
    reconfigure: Vec<NodeAction>,
) -> Vec<SubTaskGroup> {
    let name = &node.node_name;
    let wait = server_types(node).into_iter().fold(
        SubTaskGroup::new(format!("WaitForServers-{name}"), SubTaskGroupType::WaitingForServers),
        |group, server| {
            group.with(SubTask::WaitForServers {
                nodes: vec![name.clone()],
                server,
            })
        },
    );
    vec![
        SubTaskGroup::new(format!("StopServers-{name}"), SubTaskGroupType::StoppingNodeProcesses)
            .with(SubTask::node(name.clone(), stop_actions(node))),
        SubTaskGroup::new(format!("{phase}-{name}"), group_type)
            .with(SubTask::node(name.clone(), reconfigure)),
        SubTaskGroup::new(format!("StartServers-{name}"), SubTaskGroupType::StartingNodeProcesses)
            .with(SubTask::node(name.clone(), start_actions(node))),
        wait,
        set_live(&format!("SetNodeLive-{name}"), vec![name.clone()]),
    ]
}

fn resize(universe: &Universe, params: &ResizeNodeParams) -> Vec<SubTaskGroup> {
    let mut groups = Vec::new();

    for cluster in &params.base.clusters {
        let intent = &cluster.user_intent;
        let target_volume = intent.volume_size();

        for node in universe
            .nodes_in_cluster(cluster.uuid)
            .into_iter()
            .filter(|n| n.has_server_role())
        {
            let change_type = node.instance_type.as_deref() != Some(intent.instance_type.as_str());
            let grow_volume = target_volume.is_some_and(|v| node.volume_size != Some(v));
            if !params.force_resize_node && !change_type && !grow_volume {
                continue;
            }

            let mut actions = Vec::new();
            if let Some(size) = target_volume {
                if params.force_resize_node || grow_volume {
                    actions.push(NodeAction::ResizeVolume(size));
                }
            }
            if params.force_resize_node || change_type {
                actions.push(NodeAction::ChangeInstanceType(intent.instance_type.clone()));
            }
            groups.extend(rolling_node(
                node,
                "ResizeNode",
                SubTaskGroupType::ResizingNode,
                actions,
            ));
        }
    }

    groups.push(mark_success());
    groups
}

/// Root and client-root CA the universe ends up with after a TLS toggle
pub(crate) fn resolved_cas(
    universe: &Universe,
    params: &TlsToggleParams,
) -> (Option<Uuid>, Option<Uuid>) {
    let root = params.root_ca.or(universe.details.root_ca);
    let client_root = if params.root_and_client_root_ca_same == Some(true)
        && params.enable_client_to_node_encrypt
    {
        root
    } else {
        params.client_root_ca.or(universe.details.client_root_ca)
    };
    (root, client_root)
}

fn tls_toggle(universe: &Universe, params: &TlsToggleParams) -> Vec<SubTaskGroup> {
    let (root_ca, client_root_ca) = resolved_cas(universe, params);
    let configure = NodeAction::ConfigureTls(TlsSettings {
        node_to_node: params.enable_node_to_node_encrypt,
        client_to_node: params.enable_client_to_node_encrypt,
        root_ca,
        client_root_ca,
        allow_insecure: params.allow_insecure,
    });

    let mut nodes: Vec<&NodeDetails> = universe
        .details
        .nodes
        .iter()
        .filter(|n| n.has_server_role())
        .collect();
    nodes.sort_by(|a, b| a.node_name.cmp(&b.node_name));

    let mut groups = Vec::new();
    match params.base.upgrade_option {
        UpgradeOption::NonRolling => {
            let toggle = nodes.iter().fold(
                SubTaskGroup::new("ToggleTls", SubTaskGroupType::ToggleTls),
                |group, node| {
                    let mut actions = stop_actions(node);
                    actions.push(configure.clone());
                    actions.extend(start_actions(node));
                    group.with(SubTask::node(node.node_name.clone(), actions))
                },
            );
            groups.push(toggle);
            groups.push(wait_for(
                "WaitForMasters",
                names(nodes.iter().copied().filter(|n| n.is_master)),
                ServerType::Master,
            ));
            groups.push(wait_for(
                "WaitForTServers",
                names(nodes.iter().copied().filter(|n| n.is_tserver)),
                ServerType::Tserver,
            ));
            groups.push(set_live("SetNodesLive", names(nodes.iter().copied())));
        }
        _ => {
            for node in &nodes {
                groups.extend(rolling_node(
                    node,
                    "ConfigureTls",
                    SubTaskGroupType::ToggleTls,
                    vec![configure.clone()],
                ));
            }
        }
    }

    groups.push(mark_success());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{aws_intent, universe};
    use crate::model::{ClusterIntent, ResumeParams, TaskParams};

    fn group_names(groups: &[SubTaskGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.name.as_str()).collect()
    }

    fn resume_op(u: &Universe) -> Operation {
        Operation::Resume(ResumeParams {
            universe_uuid: u.universe_uuid,
            customer_uuid: None,
        })
    }

    #[test]
    fn resume_runs_phases_in_fixed_order() {
        let u = universe(4, NodeState::Stopped);
        let groups = build(&resume_op(&u), &u, 0);
        assert_eq!(
            group_names(&groups),
            vec![
                "ResumeServers",
                "StartMasters",
                "WaitForMasters",
                "StartTServer-n1",
                "StartTServer-n2",
                "StartTServer-n3",
                "StartTServer-n4",
                "WaitForTServers",
                "SetNodesLive",
                "UpdateAlertDefinitions",
                "UpdateMonitoringTargets",
                MARK_SUCCESS_GROUP,
            ]
        );
        assert_eq!(groups[1].subtasks.len(), 3);
    }

    #[test]
    fn resume_optional_phases() {
        let mut u = universe(3, NodeState::Stopped);
        u.details.imported = true;
        u.details.clusters[0].user_intent.provider_type = ProviderType::Azure;
        let groups = build(&resume_op(&u), &u, 2);
        let names = group_names(&groups);

        assert!(!names.contains(&"ResumeServers"));
        assert_eq!(names[0], "CollectServerInfo");
        let masters_ready = names.iter().position(|n| *n == "WaitForMasters").unwrap();
        assert_eq!(names[masters_ready + 1], "ActivateUniverseKeys");
    }

    #[test]
    fn resume_only_marks_role_nodes_live() {
        let mut u = universe(3, NodeState::Stopped);
        u.details.nodes[2].is_master = false;
        u.details.nodes[2].is_tserver = false;
        let groups = build(&resume_op(&u), &u, 0);
        let live = groups.iter().find(|g| g.name == "SetNodesLive").unwrap();
        assert_eq!(
            live.subtasks,
            vec![SubTask::SetNodeState {
                nodes: vec!["n1".into(), "n2".into()],
                state: NodeState::Live,
            }]
        );
    }

    fn resize_op(u: &Universe, instance_type: &str, volume: u32, force: bool) -> Operation {
        let mut intent = aws_intent(instance_type);
        if let Some(device) = intent.device_info.as_mut() {
            device.volume_size = Some(volume);
        }
        Operation::ResizeNode(ResizeNodeParams {
            base: TaskParams {
                universe_uuid: u.universe_uuid,
                clusters: vec![ClusterIntent {
                    uuid: u.details.clusters[0].uuid,
                    user_intent: intent,
                }],
                ..Default::default()
            },
            force_resize_node: force,
        })
    }

    #[test]
    fn resize_rolls_one_node_at_a_time() {
        let u = universe(2, NodeState::Live);
        let groups = build(&resize_op(&u, "c5.2xlarge", 500, false), &u, 0);
        assert_eq!(
            group_names(&groups),
            vec![
                "StopServers-n1",
                "ResizeNode-n1",
                "StartServers-n1",
                "WaitForServers-n1",
                "SetNodeLive-n1",
                "StopServers-n2",
                "ResizeNode-n2",
                "StartServers-n2",
                "WaitForServers-n2",
                "SetNodeLive-n2",
                MARK_SUCCESS_GROUP,
            ]
        );
        assert!(groups.iter().all(|g| g.subtasks.len() <= 2));
        assert_eq!(
            groups[1].subtasks,
            vec![SubTask::node(
                "n1",
                vec![
                    NodeAction::ResizeVolume(500),
                    NodeAction::ChangeInstanceType("c5.2xlarge".into()),
                ]
            )]
        );
    }

    #[test]
    fn resize_skips_nodes_already_at_target_unless_forced() {
        let mut u = universe(2, NodeState::Live);
        u.details.nodes[0].instance_type = Some("c5.2xlarge".into());
        let op = resize_op(&u, "c5.2xlarge", 250, false);
        let groups = build(&op, &u, 0);
        assert_eq!(groups[0].name, "StopServers-n2");
        assert_eq!(
            groups[1].subtasks,
            vec![SubTask::node(
                "n2",
                vec![NodeAction::ChangeInstanceType("c5.2xlarge".into())]
            )]
        );

        let forced = build(&resize_op(&u, "c5.2xlarge", 250, true), &u, 0);
        assert_eq!(forced[0].name, "StopServers-n1");
        assert_eq!(forced.len(), 11);
    }

    fn tls_op(u: &Universe, option: UpgradeOption) -> Operation {
        Operation::TlsToggle(TlsToggleParams {
            base: TaskParams {
                universe_uuid: u.universe_uuid,
                upgrade_option: option,
                ..Default::default()
            },
            enable_node_to_node_encrypt: true,
            enable_client_to_node_encrypt: true,
            allow_insecure: true,
            root_ca: Some(Uuid::new_v4()),
            client_root_ca: None,
            root_and_client_root_ca_same: Some(true),
        })
    }

    #[test]
    fn non_rolling_tls_reconfigures_every_node_in_one_group() {
        let u = universe(4, NodeState::Live);
        let groups = build(&tls_op(&u, UpgradeOption::NonRolling), &u, 0);
        assert_eq!(
            group_names(&groups),
            vec![
                "ToggleTls",
                "WaitForMasters",
                "WaitForTServers",
                "SetNodesLive",
                MARK_SUCCESS_GROUP
            ]
        );
        assert_eq!(groups[0].subtasks.len(), 4);
        match &groups[0].subtasks[3] {
            SubTask::Node { node, actions } => {
                assert_eq!(node, "n4");
                assert_eq!(actions.len(), 3);
                assert!(matches!(actions[1], NodeAction::ConfigureTls(_)));
            }
            other => panic!("unexpected subtask {other:?}"),
        }
    }

    #[test]
    fn rolling_tls_uses_the_per_node_pattern() {
        let u = universe(3, NodeState::Live);
        let groups = build(&tls_op(&u, UpgradeOption::Rolling), &u, 0);
        assert_eq!(groups.len(), 3 * 5 + 1);
        assert_eq!(groups[1].name, "ConfigureTls-n1");
    }

    #[test]
    fn same_ca_assertion_reuses_root_for_clients() {
        let u = universe(1, NodeState::Live);
        let Operation::TlsToggle(params) = tls_op(&u, UpgradeOption::Rolling) else {
            unreachable!()
        };
        let (root, client_root) = resolved_cas(&u, &params);
        assert_eq!(root, params.root_ca);
        assert_eq!(client_root, params.root_ca);
    }
}
