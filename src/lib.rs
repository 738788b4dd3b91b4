// SPDX-License-Identifier: MIT

//! tripweave-rs: a resumable, cached, fan-out/join workflow engine for
//! multi-day trip planning.

pub mod engine;
pub mod trip;
