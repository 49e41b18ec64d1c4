// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

pub mod annotation;
pub mod envelope;
pub mod frame;
pub mod payload;

mod buf;
mod error;

pub use error::CodecError;
