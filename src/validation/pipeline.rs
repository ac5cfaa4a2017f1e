/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Composable, ordered chains of message checks.

use crate::types::signed_messages::SignedMessage;

use super::ValidationError;

type CheckFn<'a> = Box<dyn Fn(&SignedMessage) -> Result<(), ValidationError> + 'a>;

/// An ordered list of named checks.
///
/// [`run`](Self::run) applies the checks in the order they were added and returns the error of the
/// first one that fails. Checks after a failing check never run.
pub struct Pipeline<'a> {
    checks: Vec<(&'static str, CheckFn<'a>)>,
}

impl<'a> Pipeline<'a> {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Append a check named `name` to the end of the pipeline.
    pub fn then(
        mut self,
        name: &'static str,
        check: impl Fn(&SignedMessage) -> Result<(), ValidationError> + 'a,
    ) -> Self {
        self.checks.push((name, Box::new(check)));
        self
    }

    /// Append a check only if `condition` holds.
    pub fn then_if(
        self,
        condition: bool,
        name: &'static str,
        check: impl Fn(&SignedMessage) -> Result<(), ValidationError> + 'a,
    ) -> Self {
        if condition {
            self.then(name, check)
        } else {
            self
        }
    }

    /// Run every check against `msg`, stopping at the first failure.
    pub fn run(&self, msg: &SignedMessage) -> Result<(), ValidationError> {
        for (name, check) in &self.checks {
            if let Err(err) = check(msg) {
                log::trace!("check {} failed: {:?}", name, err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Names of the checks, in the order they run.
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|(name, _)| *name).collect()
    }
}

impl<'a> Default for Pipeline<'a> {
    fn default() -> Self {
        Self::new()
    }
}
