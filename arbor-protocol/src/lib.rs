//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;

use arbor_utils::Responder;
use arbor_utils::ibus::{IbusChannelsTx, IbusMsg, IbusReceiver};
use arbor_utils::protocol::Protocol;
use arbor_utils::task::Task;
use derive_new::new;
use tokio::sync::mpsc;
use tracing::Span;

/// A trait for protocol instances.
pub trait ProtocolInstance
where
    Self: Send + Sized + 'static,
{
    /// Protocol type.
    const PROTOCOL: Protocol;

    /// Validated configuration the instance is started with.
    type Config: Send + 'static;

    type ProtocolInputMsg: Send + std::fmt::Debug;
    type ProtocolInputChannelsTx: Clone + Send + Sync + 'static;
    type ProtocolInputChannelsRx: MessageReceiver<Self::ProtocolInputMsg>;

    /// Create protocol instance.
    fn new(
        name: String,
        config: Self::Config,
        channels_tx: InstanceChannelsTx<Self>,
    ) -> Self;

    /// Optional protocol instance initialization routine.
    fn init(&mut self) {}

    /// Optional protocol instance shutdown routine.
    fn shutdown(self) {}

    /// Process ibus message.
    fn process_ibus_msg(&mut self, msg: IbusMsg);

    /// Process protocol message.
    fn process_protocol_msg(&mut self, msg: Self::ProtocolInputMsg);

    /// Create channels for all protocol input events.
    fn protocol_input_channels()
    -> (Self::ProtocolInputChannelsTx, Self::ProtocolInputChannelsRx);

    /// Return the tracing span used by the instance event loop.
    fn debug_span(name: &str) -> Span;
}

/// Instance output channels.
#[derive(Clone, Debug, new)]
pub struct InstanceChannelsTx<P: ProtocolInstance> {
    pub ibus: IbusChannelsTx,
    pub protocol_input: P::ProtocolInputChannelsTx,
}

/// Handle used by the manager to stop a running protocol instance.
///
/// The instance acknowledges through the provided responder once its
/// shutdown routine has completed, allowing the manager to bound the
/// teardown grace window.
pub type ShutdownSender = mpsc::Sender<Responder<()>>;

pub trait MessageReceiver<T: Send>
where
    Self: Send,
{
    fn recv(&mut self) -> impl Future<Output = Option<T>> + Send;
}

// ===== helper functions =====

async fn event_loop<P>(
    instance: &mut P,
    mut ibus_rx: IbusReceiver,
    mut protocol_input_rx: P::ProtocolInputChannelsRx,
    mut shutdown_rx: mpsc::Receiver<Responder<()>>,
) -> Option<Responder<()>>
where
    P: ProtocolInstance,
{
    loop {
        tokio::select! {
            biased;
            msg = shutdown_rx.recv() => {
                // Instance was requested to stop.
                return msg;
            }
            Some(msg) = ibus_rx.recv() => {
                instance.process_ibus_msg(msg);
            }
            Some(msg) = protocol_input_rx.recv() => {
                instance.process_protocol_msg(msg);
            }
        }
    }
}

async fn run<P>(
    name: String,
    config: P::Config,
    channels_tx: InstanceChannelsTx<P>,
    ibus_rx: IbusReceiver,
    protocol_input_rx: P::ProtocolInputChannelsRx,
    shutdown_rx: mpsc::Receiver<Responder<()>>,
) where
    P: ProtocolInstance,
{
    // Create protocol instance.
    let mut instance = P::new(name, config, channels_tx);
    instance.init();

    // Run event loop.
    let responder =
        event_loop(&mut instance, ibus_rx, protocol_input_rx, shutdown_rx)
            .await;

    // Ensure instance is shut down before acknowledging.
    instance.shutdown();
    if let Some(responder) = responder {
        let _ = responder.send(());
    }
}

// ===== global functions =====

/// Spawns a protocol instance task.
///
/// Returns the task handle, the senders used to inject protocol input
/// events (timers, commands, queries), and the shutdown handle.
pub fn spawn_protocol_task<P>(
    name: String,
    config: P::Config,
    ibus_tx: IbusChannelsTx,
    ibus_rx: IbusReceiver,
) -> (Task<()>, P::ProtocolInputChannelsTx, ShutdownSender)
where
    P: ProtocolInstance,
{
    let (proto_input_tx, proto_input_rx) = P::protocol_input_channels();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let channels_tx = InstanceChannelsTx::new(ibus_tx, proto_input_tx.clone());
    let fut = async move {
        let span = P::debug_span(&name);
        let _span_guard = span.enter();
        run::<P>(
            name,
            config,
            channels_tx,
            ibus_rx,
            proto_input_rx,
            shutdown_rx,
        )
        .await;
    };

    // Processing individual events in the main protocol task may take longer
    // than is appropriate for async tasks. To avoid starving other tasks on
    // the cooperative scheduler, protocol instances run as blocking tasks
    // backed by OS threads, relying on the OS for preemptive scheduling.
    let task = Task::spawn_blocking(|| {
        tokio::runtime::Handle::current().block_on(fut)
    });

    (task, proto_input_tx, shutdown_tx)
}
