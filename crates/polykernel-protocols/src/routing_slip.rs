//! Routing slips: the ordered per-hop record carried by every envelope.
//!
//! A command slip records each hop twice: `uri?tag=arrived` on entry and the
//! bare URI on departure, in strict arrived-then-departed order. An event
//! slip records a single stamp per hop. Entries are append-only, insertion
//! order is significant, and duplicates are protocol violations.

use crate::error::RoutingSlipError;
use crate::uri;

/// Routing slip of a command envelope, with two-phase per-hop stamping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRoutingSlip {
    entries: Vec<String>,
}

impl CommandRoutingSlip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a slip from wire entries, trusting them as already stamped.
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stamps `uri?tag=arrived`, the first half of a hop.
    pub fn stamp_as_arrived(&mut self, kernel_uri: &str) -> Result<(), RoutingSlipError> {
        let tagged = format!("{}?tag=arrived", uri::normalize_kernel_uri(kernel_uri)?);
        push_deduplicated(&mut self.entries, &tagged)
    }

    /// Stamps the bare URI, the departure half of a hop.
    ///
    /// Requires the arrived stamp for the same URI to be present already;
    /// a tagged input URI is appended as-is instead (it carries its own
    /// phase marker).
    pub fn stamp(&mut self, kernel_uri: &str) -> Result<(), RoutingSlipError> {
        let with_query = uri::normalize_kernel_uri_with_query(kernel_uri)?;
        let bare = uri::normalize_kernel_uri(kernel_uri)?;
        let tag = uri::uri_tag(kernel_uri);

        if self.entries.iter().any(|entry| *entry == with_query) {
            return Err(RoutingSlipError::AlreadyInSlip {
                uri: with_query,
                slip: join_entries(&self.entries),
            });
        }
        let arrived = format!("{bare}?tag=arrived");
        if tag.is_none() && self.entries.iter().any(|entry| *entry == arrived) {
            self.entries.push(with_query);
            Ok(())
        } else if tag.is_some() {
            self.entries.push(with_query);
            Ok(())
        } else {
            Err(RoutingSlipError::NotInSlip {
                uri: with_query,
                slip: join_entries(&self.entries),
            })
        }
    }

    /// Merges a peer's already-traveled slip into this one.
    ///
    /// When the continuation extends this slip, only the suffix beyond the
    /// shared prefix is appended; every appended entry still goes through the
    /// command stamp rule.
    pub fn continue_with(&mut self, kernel_uris: &[String]) -> Result<(), RoutingSlipError> {
        let mut to_continue = normalize_slip(kernel_uris)?;
        if slip_starts_with(&to_continue, &self.entries) {
            to_continue.drain(..self.entries.len());
        }
        let original = join_entries(&self.entries);
        for normalized in to_continue {
            if contains_query_normalized(&self.entries, &normalized) {
                return Err(RoutingSlipError::CannotContinue {
                    uri: normalized,
                    slip: original,
                    continuation: join_bare(kernel_uris),
                });
            }
            self.stamp(&normalized)?;
        }
        Ok(())
    }

    /// True when this slip begins with every entry of `other`, compared
    /// bare-URI and positionally.
    pub fn starts_with(&self, other: &[String]) -> bool {
        slip_starts_with(&self.entries, other)
    }

    /// True when some entry matches `kernel_uri`; comparison is bare when
    /// `ignore_query`, else query-aware, on both sides.
    pub fn contains(&self, kernel_uri: &str, ignore_query: bool) -> bool {
        slip_contains(&self.entries, kernel_uri, ignore_query)
    }
}

/// Routing slip of an event envelope: one stamp per hop, duplicates rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRoutingSlip {
    entries: Vec<String>,
}

impl EventRoutingSlip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a slip from wire entries, trusting them as already stamped.
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the query-normalized URI unless an equal entry exists.
    pub fn stamp(&mut self, kernel_uri: &str) -> Result<(), RoutingSlipError> {
        push_deduplicated(&mut self.entries, kernel_uri)
    }

    /// Merges a peer's already-traveled slip into this one (see
    /// [`CommandRoutingSlip::continue_with`]).
    pub fn continue_with(&mut self, kernel_uris: &[String]) -> Result<(), RoutingSlipError> {
        let mut to_continue = normalize_slip(kernel_uris)?;
        if slip_starts_with(&to_continue, &self.entries) {
            to_continue.drain(..self.entries.len());
        }
        let original = join_entries(&self.entries);
        for normalized in to_continue {
            if contains_query_normalized(&self.entries, &normalized) {
                return Err(RoutingSlipError::CannotContinue {
                    uri: normalized,
                    slip: original,
                    continuation: join_bare(kernel_uris),
                });
            }
            self.stamp(&normalized)?;
        }
        Ok(())
    }

    pub fn starts_with(&self, other: &[String]) -> bool {
        slip_starts_with(&self.entries, other)
    }

    pub fn contains(&self, kernel_uri: &str, ignore_query: bool) -> bool {
        slip_contains(&self.entries, kernel_uri, ignore_query)
    }
}

/// Normalizes and deduplicates a list of URIs, preserving first-seen order.
fn normalize_slip(kernel_uris: &[String]) -> Result<Vec<String>, RoutingSlipError> {
    let mut normalized = Vec::with_capacity(kernel_uris.len());
    for kernel_uri in kernel_uris {
        let entry = uri::normalize_kernel_uri_with_query(kernel_uri)?;
        if !normalized.contains(&entry) {
            normalized.push(entry);
        }
    }
    Ok(normalized)
}

fn push_deduplicated(entries: &mut Vec<String>, kernel_uri: &str) -> Result<(), RoutingSlipError> {
    let normalized = uri::normalize_kernel_uri_with_query(kernel_uri)?;
    if contains_query_normalized(entries, &normalized) {
        return Err(RoutingSlipError::AlreadyInSlip {
            uri: normalized,
            slip: join_entries(entries),
        });
    }
    entries.push(normalized);
    Ok(())
}

fn contains_query_normalized(entries: &[String], normalized: &str) -> bool {
    entries.iter().any(|entry| {
        uri::normalize_kernel_uri_with_query(entry)
            .map(|candidate| candidate == normalized)
            .unwrap_or(false)
    })
}

fn slip_starts_with(this_uris: &[String], other_uris: &[String]) -> bool {
    if other_uris.is_empty() || this_uris.len() < other_uris.len() {
        return false;
    }
    other_uris.iter().zip(this_uris).all(|(other, this_entry)| {
        match (
            uri::normalize_kernel_uri(other),
            uri::normalize_kernel_uri(this_entry),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    })
}

fn slip_contains(entries: &[String], kernel_uri: &str, ignore_query: bool) -> bool {
    let normalized = if ignore_query {
        uri::normalize_kernel_uri(kernel_uri)
    } else {
        uri::normalize_kernel_uri_with_query(kernel_uri)
    };
    let Ok(normalized) = normalized else {
        return false;
    };
    entries.iter().any(|entry| {
        let candidate = if ignore_query {
            uri::normalize_kernel_uri(entry)
        } else {
            uri::normalize_kernel_uri_with_query(entry)
        };
        candidate.map(|c| c == normalized).unwrap_or(false)
    })
}

fn join_entries(entries: &[String]) -> String {
    entries.join(",")
}

fn join_bare(kernel_uris: &[String]) -> String {
    kernel_uris
        .iter()
        .map(|kernel_uri| {
            uri::normalize_kernel_uri(kernel_uri).unwrap_or_else(|_| kernel_uri.clone())
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[path = "routing_slip_tests.rs"]
mod tests;
