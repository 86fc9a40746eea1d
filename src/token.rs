// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Random token source used to mint device ids and session ids.

use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes in a generated token (hex-encoded to twice this).
pub const TOKEN_BYTES: usize = 32;

/// Source of opaque random tokens.
pub trait TokenSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Cryptographically secure tokens from the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
