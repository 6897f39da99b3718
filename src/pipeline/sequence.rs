//! Component type ordering
//!
//! The order components are processed in is data, not logic: a fixed table
//! of orderings selected by the deployment's sequence flags.

use crate::template::ComponentType::{self, *};
use crate::template::SequenceFlags;

/// Flag combination and the ordering it selects. HA clusters need their
/// configuration lanes settled before the cluster forms; fabric-attached
/// storage comes up before the servers that consume it.
const SEQUENCE_TABLE: &[(SequenceFlags, &[ComponentType])] = &[
    (
        SequenceFlags {
            storage_before_server: true,
            include_virtual_machines: false,
            ha_cluster: false,
        },
        &[Storage, Server, Cluster, Configuration, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: true,
            include_virtual_machines: true,
            ha_cluster: false,
        },
        &[Storage, Server, Cluster, VirtualMachine, Configuration, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: true,
            include_virtual_machines: false,
            ha_cluster: true,
        },
        &[Storage, Server, Configuration, Cluster, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: true,
            include_virtual_machines: true,
            ha_cluster: true,
        },
        &[Storage, Server, Configuration, Cluster, VirtualMachine, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: false,
            include_virtual_machines: false,
            ha_cluster: false,
        },
        &[Server, Storage, Cluster, Configuration, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: false,
            include_virtual_machines: true,
            ha_cluster: false,
        },
        &[Server, Storage, Cluster, VirtualMachine, Configuration, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: false,
            include_virtual_machines: false,
            ha_cluster: true,
        },
        &[Server, Storage, Configuration, Cluster, Service],
    ),
    (
        SequenceFlags {
            storage_before_server: false,
            include_virtual_machines: true,
            ha_cluster: true,
        },
        &[Server, Storage, Configuration, Cluster, VirtualMachine, Service],
    ),
];

/// The component type ordering for a deployment's flags
pub fn component_sequence(flags: &SequenceFlags) -> &'static [ComponentType] {
    SEQUENCE_TABLE
        .iter()
        .find(|(row, _)| row == flags)
        .map(|(_, sequence)| *sequence)
        .expect("sequence table covers every flag combination")
}
