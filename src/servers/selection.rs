//! Server selection: fastest, random, and multihop conflict handling.
use std::collections::BTreeSet;

use log::debug;
use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

use super::{GeoLocation, Server};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no applicable servers")]
    NoServers,
    #[error("unknown gateway '{0}'")]
    UnknownGateway(String),
    #[error("entry and exit servers are the same")]
    SameGateway,
    #[error("entry and exit ISPs {conflicting:?} cannot be separated without emptying one side")]
    UnresolvableIspConflict { conflicting: Vec<String> },
}

/// Pick the server with the lowest measured latency.
///
/// Servers whose gateway is in `exclude` are skipped. Without any latency data
/// the server nearest to `location` wins, and failing that the first
/// applicable one.
pub fn fastest_server<'a>(
    servers: &[&'a Server],
    exclude: &[String],
    location: Option<&GeoLocation>,
) -> Option<&'a Server> {
    let applicable: Vec<&'a Server> = servers
        .iter()
        .copied()
        .filter(|s| !exclude.contains(&s.gateway))
        .collect();

    let fastest = applicable
        .iter()
        .copied()
        .filter_map(|s| s.ping.filter(|p| *p > 0).map(|p| (p, s)))
        .min_by_key(|(p, _)| *p)
        .map(|(_, s)| s);
    if fastest.is_some() {
        return fastest;
    }

    if let Some(location) = location {
        debug!("no latency data, choosing the nearest server");
        let nearest = applicable.iter().copied().min_by(|a, b| {
            let da = location.distance_km(&a.location());
            let db = location.distance_km(&b.location());
            da.total_cmp(&db)
        });
        if nearest.is_some() {
            return nearest;
        }
    }

    applicable.first().copied()
}

/// Attributes of the other multihop leg that a random pick must avoid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusion {
    pub country_code: Option<String>,
    pub gateway: Option<String>,
}

impl Exclusion {
    pub fn none() -> Self {
        Self::default()
    }

    /// Avoid the gateway of `other`, and its country when `same_country` is set.
    pub fn other_leg(other: &Server, same_country: bool) -> Self {
        Self {
            country_code: same_country.then(|| other.country_code.clone()),
            gateway: Some(other.gateway.clone()),
        }
    }

    fn allows(&self, server: &Server) -> bool {
        self.country_code
            .as_ref()
            .is_none_or(|cc| *cc != server.country_code)
            && self.gateway.as_ref().is_none_or(|gw| *gw != server.gateway)
    }
}

/// Uniform random pick among servers not excluded.
pub fn random_server<'a, R: Rng + ?Sized>(
    servers: &[&'a Server],
    exclusion: &Exclusion,
    rng: &mut R,
) -> Option<&'a Server> {
    let candidates: Vec<&'a Server> = servers
        .iter()
        .copied()
        .filter(|s| exclusion.allows(s))
        .collect();
    candidates.choose(rng).copied()
}

/// Why a server is a poor choice for one multihop leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    SameGateway,
    SameCountry,
    SameIsp,
}

impl Conflict {
    pub fn message(&self) -> &'static str {
        match self {
            Conflict::SameGateway => "Entry and exit servers are the same",
            Conflict::SameCountry => "Entry and exit servers located in the same country",
            Conflict::SameIsp => "Entry and exit servers are operated by the same ISP",
        }
    }

    pub fn detail(&self) -> &'static str {
        match self {
            Conflict::SameGateway => "Please select a different entry or exit server.",
            Conflict::SameCountry => {
                "Using Multi-Hop servers from the same country may decrease your privacy."
            }
            Conflict::SameIsp => {
                "Using Multi-Hop servers operated by the same ISP may decrease your privacy."
            }
        }
    }

    /// Same gateway makes a multihop connection impossible; the rest are warnings.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Conflict::SameGateway)
    }
}

/// Which optional warnings [`check_inaccessible`] reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictCheck {
    pub warn_same_country: bool,
    pub warn_same_isp: bool,
}

/// Check `candidate` against the server chosen for the other leg.
pub fn check_inaccessible(
    candidate: &Server,
    other_leg: Option<&Server>,
    check: ConflictCheck,
) -> Option<Conflict> {
    let other = other_leg?;

    if candidate.gateway == other.gateway {
        Some(Conflict::SameGateway)
    } else if check.warn_same_country && candidate.country_code == other.country_code {
        Some(Conflict::SameCountry)
    } else if check.warn_same_isp && candidate.isp == other.isp {
        Some(Conflict::SameIsp)
    } else {
        None
    }
}

/// Make the entry and exit ISP sets disjoint.
///
/// Conflicting ISPs are shuffled and split as evenly as possible: the first
/// half is dropped from the entry side, the rest from the exit side. When the
/// count is odd the extra removal lands on a random side, so a side must keep
/// a member under either outcome; otherwise the conflict is unresolvable.
pub fn resolve_isp_overlap<R: Rng + ?Sized>(
    entry: &BTreeSet<String>,
    exit: &BTreeSet<String>,
    rng: &mut R,
) -> Result<(BTreeSet<String>, BTreeSet<String>), SelectionError> {
    let mut conflicting: Vec<String> = entry.intersection(exit).cloned().collect();
    if conflicting.is_empty() {
        return Ok((entry.clone(), exit.clone()));
    }

    let k = conflicting.len();
    let entry_only = entry.len() - k;
    let exit_only = exit.len() - k;
    if entry_only + k / 2 == 0 || exit_only + k / 2 == 0 {
        return Err(SelectionError::UnresolvableIspConflict { conflicting });
    }

    conflicting.shuffle(rng);
    let from_entry = if k % 2 == 1 && rng.gen_bool(0.5) {
        k / 2 + 1
    } else {
        k / 2
    };
    let (drop_entry, drop_exit) = conflicting.split_at(from_entry);

    let entry = entry
        .iter()
        .filter(|isp| !drop_entry.contains(isp))
        .cloned()
        .collect();
    let exit = exit
        .iter()
        .filter(|isp| !drop_exit.contains(isp))
        .cloned()
        .collect();

    Ok((entry, exit))
}

/// Random entry and exit servers operated by different ISPs.
pub fn random_multihop_pair<'a, R: Rng + ?Sized>(
    entry_candidates: &[&'a Server],
    exit_candidates: &[&'a Server],
    rng: &mut R,
) -> Result<(&'a Server, &'a Server), SelectionError> {
    let isps = |servers: &[&Server]| -> BTreeSet<String> {
        servers.iter().map(|s| s.isp.clone()).collect()
    };
    let (entry_isps, exit_isps) = resolve_isp_overlap(
        &isps(entry_candidates),
        &isps(exit_candidates),
        &mut *rng,
    )?;

    let pick = |servers: &[&'a Server], allowed: &BTreeSet<String>, rng: &mut R| {
        let matching: Vec<&'a Server> = servers
            .iter()
            .copied()
            .filter(|s| allowed.contains(&s.isp))
            .collect();
        matching.choose(rng).copied()
    };

    let entry = pick(entry_candidates, &entry_isps, &mut *rng).ok_or(SelectionError::NoServers)?;
    let exit = pick(exit_candidates, &exit_isps, rng).ok_or(SelectionError::NoServers)?;
    Ok((entry, exit))
}
