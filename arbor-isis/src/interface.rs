//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_utils::UnboundedSender;
use arbor_utils::socket::{AsyncFd, Socket};
use arbor_utils::task::{IntervalTask, Task};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::adjacency::{Adjacency, AdjacencyEvent, AdjacencyState};
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::instance::InstanceUpView;
use crate::lsdb;
use crate::network;
use crate::output;
use crate::packet::pdu::Lsp;
use crate::packet::tlv::LspEntry;
use crate::packet::{LanId, LevelNumber, LevelType, Levels, LspId, SystemId};
use crate::tasks;
use crate::tasks::messages::output::NetTxPduMsg;

// Type alias for the instance-wide interface table.
pub type Interfaces = BTreeMap<String, Interface>;

// Interface circuit types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    Broadcast,
    PointToPoint,
}

// IS-IS interface configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceCfg {
    pub ifindex: u32,
    pub addr: Ipv4Network,
    pub snpa: [u8; 6],
    pub circuit_type: InterfaceType,
    pub level_type: LevelType,
    pub metric: u32,
    pub hello_interval: u16,
    pub hello_multiplier: u16,
    pub priority: u8,
    pub passive: bool,
    pub wide_metrics: bool,
    pub csnp_interval: u16,
}

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    pub active: bool,
    // Local circuit ID, used as the pseudonode ID when this system is DIS.
    pub circuit_id: u8,
    pub adjacencies: BTreeMap<SystemId, Adjacency>,
    pub dis: Levels<Option<LanId>>,
    // Send Routing Message flags: LSPs pending flooding on this interface.
    pub srm_list: Levels<BTreeMap<LspId, Arc<Lsp>>>,
    // Send Sequence Number flags: LSP entries pending acknowledgment in a
    // PSNP.
    pub ssn_list: Levels<BTreeMap<LspId, LspEntry>>,
    pub net: Option<InterfaceNet>,
    pub tasks: InterfaceTasks,
}

#[derive(Debug)]
pub struct InterfaceNet {
    pub socket: Arc<AsyncFd<Socket>>,
    pub net_tx_pdup: UnboundedSender<NetTxPduMsg>,
    _net_tx_task: Task<()>,
    _net_rx_task: Task<()>,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Levels<Option<IntervalTask>>,
    pub csnp_interval: Levels<Option<IntervalTask>>,
    pub srm_interval: Option<IntervalTask>,
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        name: String,
        config: InterfaceCfg,
        circuit_id: u8,
    ) -> Interface {
        let mut iface = Interface {
            name,
            config,
            state: Default::default(),
        };
        iface.state.circuit_id = circuit_id;
        iface
    }

    // Starts interface operation: opens the raw packet socket, joins the
    // IS-IS multicast groups and kicks off the periodic tasks.
    pub(crate) fn start(
        &mut self,
        instance: &InstanceUpView<'_>,
    ) -> Result<(), Error> {
        Debug::InterfaceStart(&self.name).log();

        let net = InterfaceNet::new(self, instance).map_err(|error| {
            Error::InterfaceStartError(self.name.clone(), error)
        })?;
        self.state.net = Some(net);
        self.state.active = true;

        if !self.config.passive {
            // Start hello tasks for the levels this circuit participates
            // in (a single task on point-to-point circuits).
            match self.config.circuit_type {
                InterfaceType::Broadcast => {
                    for level in self.levels() {
                        let task =
                            tasks::hello_interval(self, instance, level);
                        *self.state.tasks.hello_interval.get_mut(level) =
                            Some(task);
                    }
                }
                InterfaceType::PointToPoint => {
                    let task = tasks::hello_interval(
                        self,
                        instance,
                        LevelNumber::L1,
                    );
                    self.state.tasks.hello_interval.l1 = Some(task);
                }
            }

            // Start the flooding (SRM scan) task.
            let task = tasks::srm_interval(self, instance);
            self.state.tasks.srm_interval = Some(task);

            // Periodic CSNPs on point-to-point circuits help prevent
            // synchronization issues; on LANs they start upon DIS
            // election.
            if self.config.circuit_type == InterfaceType::PointToPoint {
                for level in self.levels() {
                    let task = tasks::csnp_interval(self, instance, level);
                    *self.state.tasks.csnp_interval.get_mut(level) =
                        Some(task);
                }
            }
        }

        Ok(())
    }

    pub(crate) fn stop(&mut self, instance: &InstanceUpView<'_>) {
        Debug::InterfaceStop(&self.name).log();

        let mut adjacencies = std::mem::take(&mut self.state.adjacencies);
        for adj in adjacencies.values_mut() {
            adj.state_change(
                instance,
                AdjacencyEvent::LinkDown,
                AdjacencyState::Down,
            );
        }

        self.state = Default::default();
    }

    // Levels this interface participates in.
    pub(crate) fn levels(&self) -> Vec<LevelNumber> {
        self.config.level_type.levels().collect()
    }

    pub(crate) fn is_dis(
        &self,
        system_id: SystemId,
        level: LevelNumber,
    ) -> bool {
        self.state.dis.get(level).map(|dis| dis.system_id)
            == Some(system_id)
    }

    // DIS election (ISO 10589, Section 8.4.5). Unlike OSPF's DR, the DIS
    // is preemptable: a better candidate takes over immediately.
    pub(crate) fn dis_election(
        &mut self,
        instance: &InstanceUpView<'_>,
        level: LevelNumber,
    ) {
        let system_id = instance.config.system_id;

        // Candidates: the local system and every Up adjacency at this
        // level. Highest priority wins; ties break on the highest
        // system-id.
        let local = (self.config.priority, system_id);
        let best_adj = self
            .state
            .adjacencies
            .values()
            .filter(|adj| adj.state == AdjacencyState::Up)
            .filter(|adj| adj.level_usage.intersects(level))
            .map(|adj| (adj.priority.unwrap_or(64), adj.system_id))
            .max();

        let dis = match best_adj {
            Some(best_adj) if best_adj > local => {
                // The elected neighbor names the pseudonode through the
                // LAN ID advertised in its hellos.
                self.state
                    .adjacencies
                    .values()
                    .find(|adj| adj.system_id == best_adj.1)
                    .and_then(|adj| adj.lan_id)
            }
            _ => Some(LanId::from((system_id, self.state.circuit_id))),
        };

        let old_dis = *self.state.dis.get(level);
        if old_dis == dis {
            return;
        }
        Debug::DisChange(&self.name, level, dis).log();
        *self.state.dis.get_mut(level) = dis;

        // The new DIS starts periodic CSNP transmission, the old one
        // stops.
        let is_dis = dis.map(|dis| dis.system_id) == Some(system_id);
        let was_dis = old_dis.map(|dis| dis.system_id) == Some(system_id);
        if is_dis && !was_dis {
            let task = tasks::csnp_interval(self, instance, level);
            *self.state.tasks.csnp_interval.get_mut(level) = Some(task);
        } else if !is_dis && was_dis {
            *self.state.tasks.csnp_interval.get_mut(level) = None;
        }

        // The topology view of this LAN changed.
        instance.tx.protocol_input.lsp_orig_event(level.into());
    }

    // Enqueues a PDU for transmission on this interface.
    pub(crate) fn enqueue_pdu(&self, msg: NetTxPduMsg) {
        if let Some(net) = &self.state.net {
            let _ = net.net_tx_pdup.send(msg);
        }
    }

    pub(crate) fn send_hello(
        &self,
        instance: &InstanceUpView<'_>,
        level: LevelNumber,
    ) {
        output::send_hello(self, instance, level);
    }

    // Sends a full CSNP describing the local database.
    pub(crate) fn send_csnp(
        &mut self,
        instance: &InstanceUpView<'_>,
        lsdb: &lsdb::Lsdb,
        level: LevelNumber,
    ) {
        // On LANs only the DIS sends periodic CSNPs.
        if self.config.circuit_type == InterfaceType::Broadcast
            && !self.is_dis(instance.config.system_id, level)
        {
            return;
        }
        output::send_csnp(self, instance, lsdb, level);
    }
}

// ===== impl InterfaceNet =====

impl InterfaceNet {
    fn new(
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) -> Result<InterfaceNet, IoError> {
        let socket = network::socket(iface.config.ifindex)
            .map_err(IoError::SocketError)
            .and_then(|socket| {
                AsyncFd::new(socket).map_err(IoError::SocketError)
            })
            .map(Arc::new)?;

        // Start network Tx/Rx tasks.
        let (net_tx_pdup, net_tx_pduc) = mpsc::unbounded_channel();
        let net_tx_task = tasks::net_tx(
            socket.clone(),
            iface.name.clone(),
            iface.config.ifindex,
            net_tx_pduc,
        );
        let net_rx_task = tasks::net_rx(
            socket.clone(),
            iface.name.clone(),
            instance.tx.protocol_input.net_pdu_rx.clone(),
        );

        Ok(InterfaceNet {
            socket,
            net_tx_pdup,
            _net_tx_task: net_tx_task,
            _net_rx_task: net_rx_task,
        })
    }
}
