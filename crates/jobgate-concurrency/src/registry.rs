//! Job type definitions and policy lookup.
//!
//! Each [`JobType`] carries its own optional [`LimitPolicy`] and an optional
//! parent. Lookup walks the ancestor chain, so a subtype without its own
//! policy inherits the nearest ancestor's.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use jobgate_core::config::{ConcurrencyConfig, PolicyConfig};

use crate::policy::LimitPolicy;

/// A job type definition.
#[derive(Debug, Clone)]
pub struct JobType {
    /// Job class name.
    pub name: String,
    /// Parent job class, if any.
    pub parent: Option<String>,
    /// Concurrency policy attached to this type.
    pub policy: Option<LimitPolicy>,
}

impl JobType {
    /// Define a job type with no parent and no policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            policy: None,
        }
    }

    /// Inherit from a parent job type.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Attach a concurrency policy.
    pub fn with_concurrency(mut self, policy: LimitPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl From<&PolicyConfig> for JobType {
    fn from(config: &PolicyConfig) -> Self {
        let mut policy = LimitPolicy::new();
        if let Some(limit) = config.enqueue_limit {
            policy = policy.enqueue_limit(limit);
        }
        if let Some(limit) = config.total_limit {
            policy = policy.total_limit(limit);
        }
        if let Some(limit) = config.perform_limit {
            policy = policy.perform_limit(limit);
        }
        if let Some(argument) = &config.key_argument {
            policy = policy.key_argument(argument.clone());
        } else if let Some(key) = &config.key {
            policy = policy.key_literal(key.clone());
        }

        let mut job_type = Self::new(config.job_class.clone());
        if let Some(parent) = &config.extends {
            job_type = job_type.extends(parent.clone());
        }

        // An entry that only names a parent inherits the parent's policy.
        let declares_policy = policy.has_limits()
            || config.key_argument.is_some()
            || config.key.is_some();
        if declares_policy {
            job_type = job_type.with_concurrency(policy);
        }
        job_type
    }
}

/// Registry of job types, keyed by class name.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    types: HashMap<String, JobType>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from policies declared in configuration.
    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        let mut registry = Self::new();
        for policy in &config.policies {
            registry.register(JobType::from(policy));
        }
        registry
    }

    /// Register a job type. Replaces any earlier registration of the same class.
    pub fn register(&mut self, job_type: JobType) -> &mut Self {
        if self.types.contains_key(&job_type.name) {
            debug!(job_class = %job_type.name, "Replacing job type registration");
        }
        info!(
            job_class = %job_type.name,
            parent = ?job_type.parent,
            policy = ?job_type.policy,
            "Registered job type"
        );
        self.types.insert(job_type.name.clone(), job_type);
        self
    }

    /// Look up a job type by class name.
    pub fn get(&self, job_class: &str) -> Option<&JobType> {
        self.types.get(job_class)
    }

    /// Resolve the policy for a class, walking up the ancestor chain.
    pub fn policy_for(&self, job_class: &str) -> Option<&LimitPolicy> {
        let mut visited = HashSet::new();
        let mut current = self.types.get(job_class);

        while let Some(job_type) = current {
            if !visited.insert(job_type.name.as_str()) {
                warn!(job_class = %job_class, "Cycle in job type ancestry");
                return None;
            }
            if let Some(policy) = &job_type.policy {
                return Some(policy);
            }
            current = job_type
                .parent
                .as_deref()
                .and_then(|parent| self.types.get(parent));
        }

        None
    }

    /// Registered class names.
    pub fn job_classes(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }
}
