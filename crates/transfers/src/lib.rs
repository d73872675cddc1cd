//! Inter-branch transfer workflow (event-sourced aggregate).
//!
//! This crate contains the transfer state machine, implemented purely as
//! deterministic domain logic. Unit claims, stock movements and persistence are
//! orchestrated by `branchstock-infra::engine::transfers`.

pub mod transfer;

pub use transfer::{
    CancelTransfer, DispatchTransfer, ReceiveTransfer, RequestTransfer, Transfer,
    TransferCancelled, TransferCommand, TransferDispatched, TransferEvent, TransferLine,
    TransferReceived, TransferRequested, TransferStatus,
};
