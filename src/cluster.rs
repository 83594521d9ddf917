// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Node Set Resolution
//!
//! Decides whether a parsed [`NodeSet`] describes a single broker or a cluster
//! and derives the login every connection attempt uses.
//!
//! In a cluster the primary node supplies the user name, password and virtual
//! host; peers only contribute their address. Credentials written next to a
//! peer are ignored.

use crate::{
    connection::{NodeDescriptor, NodeSet, ServiceBusNamespace},
    errors::AdapterError,
};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use std::fmt;
use tracing::{debug, error};

/// AMQP port used when a node does not name one
pub const DEFAULT_AMQP_PORT: u16 = 5672;

/// How the process reaches its broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterPlan {
    /// One cluster broker node
    Single(NodeDescriptor),
    /// A cluster broker with failover peers
    Cluster {
        primary: NodeDescriptor,
        peers: Vec<NodeDescriptor>,
    },
    /// A managed cloud bus namespace
    Managed(ServiceBusNamespace),
}

impl ClusterPlan {
    /// Short variant name used in logs and `UnsupportedTopology` errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterPlan::Single(_) => "single",
            ClusterPlan::Cluster { .. } => "cluster",
            ClusterPlan::Managed(_) => "managed",
        }
    }

    /// Connection parameters for the cluster broker, `None` for a managed namespace.
    pub fn amqp_settings(&self) -> Option<ConnectionSettings> {
        match self {
            ClusterPlan::Single(node) => Some(ConnectionSettings::new(node, &[])),
            ClusterPlan::Cluster { primary, peers } => Some(ConnectionSettings::new(primary, peers)),
            ClusterPlan::Managed(_) => None,
        }
    }
}

impl fmt::Display for ClusterPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterPlan::Single(node) => write!(f, "single({node})"),
            ClusterPlan::Cluster { primary, peers } => {
                write!(f, "cluster({primary}")?;
                for peer in peers {
                    write!(f, ", {}", peer.host())?;
                }
                f.write_str(")")
            }
            ClusterPlan::Managed(ns) => write!(f, "managed({ns})"),
        }
    }
}

/// Classifies a node set as single node or cluster.
///
/// # Parameters
/// * `nodes` - Parsed connection string, never empty
///
/// # Returns
/// `Single` for one node, otherwise `Cluster` with the remaining nodes as
/// peers in their original order
pub fn resolve(nodes: NodeSet) -> ClusterPlan {
    let (primary, peers) = nodes.into_parts();

    if peers.is_empty() {
        debug!(host = primary.host(), "single node broker");
        return ClusterPlan::Single(primary);
    }

    debug!(
        primary = primary.host(),
        peers = peers.len(),
        "clustered broker"
    );

    ClusterPlan::Cluster { primary, peers }
}

/// Wraps a cloud bus namespace.
pub fn resolve_managed(namespace: ServiceBusNamespace) -> ClusterPlan {
    debug!(endpoint = namespace.endpoint(), "managed bus namespace");
    ClusterPlan::Managed(namespace)
}

/// Address of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub host: String,
    /// `None` selects [`DEFAULT_AMQP_PORT`]
    pub port: Option<String>,
}

/// Login plus the ordered list of members a connector may try.
///
/// The first member is always the primary node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Login of the primary node, shared by every member
    pub user_name: String,
    pub password: String,
    pub virtual_host: String,
    pub members: Vec<ClusterMember>,
}

impl ConnectionSettings {
    fn new(primary: &NodeDescriptor, peers: &[NodeDescriptor]) -> Self {
        let members = std::iter::once(primary)
            .chain(peers)
            .map(|node| ClusterMember {
                host: node.host().to_owned(),
                port: Some(node.port().to_owned()).filter(|p| !p.is_empty()),
            })
            .collect();

        ConnectionSettings {
            user_name: primary.user_name().to_owned(),
            password: primary.password().to_owned(),
            virtual_host: primary.virtual_host().to_owned(),
            members,
        }
    }

    /// AMQP URI for the given member, using the shared login.
    ///
    /// # Parameters
    /// * `member` - One of `self.members`
    ///
    /// # Returns
    /// The URI handed to the connection, or `AdapterError::InvalidPort` when
    /// the member port is not a number
    pub fn uri(&self, member: &ClusterMember) -> Result<AMQPUri, AdapterError> {
        let port = match &member.port {
            Some(port) => port.parse::<u16>().map_err(|_| {
                error!(host = member.host, port, "invalid member port");
                AdapterError::InvalidPort(member.host.clone(), port.clone())
            })?,
            None => DEFAULT_AMQP_PORT,
        };

        Ok(AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user_name.clone(),
                    password: self.password.clone(),
                },
                host: member.host.clone(),
                port,
            },
            vhost: self.virtual_host.clone(),
            ..AMQPUri::default()
        })
    }
}
