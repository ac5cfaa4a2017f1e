/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or integers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::{CryptoHasher, Digest};

/// Sequence number of one duty occurrence for an [`Identifier`](super::identifier::Identifier).
///
/// Every height is decided by exactly one consensus [`Instance`](crate::instance::Instance). The
/// height a [`Controller`](crate::controller::Controller) works on never decreases.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Height(u64);

impl Height {
    /// Create a new `Height` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Height`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the big-endian representation of the inner value. Used in storage keys so that keys sort
    /// in height order.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Height {
    type Output = Height;

    fn add(self, rhs: u64) -> Self::Output {
        Height(self.0.add(rhs))
    }
}

/// Attempt counter within a [`Height`]. Starts at [`Round::FIRST`] and increases on every round
/// change.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    /// The round every instance starts in.
    pub const FIRST: Round = Round(1);

    /// Create a new `Round` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `Round`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Round {
    type Output = Round;

    fn add(self, rhs: u64) -> Self::Output {
        Round(self.0.add(rhs))
    }
}

impl AddAssign<u64> for Round {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

/// Globally unique number identifying an operator.
///
/// Operator IDs double as the x-coordinates of the operators' key shares in the threshold
/// secret-sharing scheme, so they must never be 0.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct OperatorID(u64);

impl OperatorID {
    /// Create a new `OperatorID` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `OperatorID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for OperatorID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Opaque duty data that a committee agrees on and then co-signs.
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Create a new `Value` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner bytes of this `Value`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compute the SHA-256 digest of this `Value`.
    pub fn digest(&self) -> CryptoHash {
        CryptoHash::sha256(&self.0)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value(value.as_bytes().to_vec())
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "Value({:?})", text),
            Err(_) => write!(f, "Value({:?})", self.0),
        }
    }
}

/// 32-byte SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash `bytes` with SHA-256.
    pub fn sha256(bytes: &[u8]) -> Self {
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Compressed BLS12-381 G2 signature.
///
/// Within this crate these are produced using the [`blst`] crate, whose main definitions are
/// re-exported from the [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 96]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 96]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 96]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 96] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({:02x?}..)", &self.0[..4])
    }
}

/// Compressed BLS12-381 G1 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct PublicKeyBytes([u8; 48]);

impl PublicKeyBytes {
    /// Create a new `PublicKeyBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 48]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 48]` value of this `PublicKeyBytes`.
    pub const fn bytes(&self) -> [u8; 48] {
        self.0
    }
}

impl Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({:02x?}..)", &self.0[..4])
    }
}

/// Four-byte tag mixed into every signing root, so that signatures made for one network or fork
/// cannot be replayed on another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct DomainType([u8; 4]);

impl DomainType {
    /// Create a new `DomainType` wrapping `bytes`.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 4]` value of this `DomainType`.
    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }
}
