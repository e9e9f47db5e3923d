// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Accelerator-side surface: the `get`/`request` API used inside
//! parallel kernels, plus the two resident "device teams" — the
//! aggregator and the responder — modeled here as persistent OS
//! threads polling shared state, the portable substitute for targets
//! without persistent-kernel support.

pub mod aggregator;
pub mod responder;
pub mod worker;

pub use worker::DeviceWorker;
