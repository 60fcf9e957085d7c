//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bytes;
pub mod ibus;
pub mod ip;
pub mod protocol;
pub mod socket;
pub mod southbound;
pub mod task;

// Useful type definitions.
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
pub type Responder<T> = tokio::sync::oneshot::Sender<T>;
