use super::{DataJob, builtin};
use crate::error::SetupError;

/// Builds a fresh job instance.
pub type JobFactory = fn() -> Box<dyn DataJob>;

/// Explicit name → factory table. Registration order is listing order.
#[derive(Default)]
pub struct JobRegistry {
    entries: Vec<(String, JobFactory)>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in jobs.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (name, factory) in builtin::BUILTIN_JOBS {
            // builtin names are distinct
            let _ = registry.register(name, *factory);
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: JobFactory) -> Result<(), SetupError> {
        if self.entries.iter().any(|(n, _)| n == name) {
            return Err(SetupError::DuplicateJob(name.to_string()));
        }
        self.entries.push((name.to_string(), factory));
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Instantiate by registered name, or by a job's type name.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn DataJob>, SetupError> {
        if let Some((_, factory)) = self.entries.iter().find(|(n, _)| n == name) {
            return Ok(factory());
        }
        self.entries
            .iter()
            .map(|(_, factory)| factory())
            .find(|job| job.type_name() == name)
            .ok_or_else(|| SetupError::UnknownJob(name.to_string()))
    }

    /// Resolve every name in order. Disabled jobs are dropped with a log line.
    pub fn resolve_all(&self, names: &[String]) -> Result<Vec<Box<dyn DataJob>>, SetupError> {
        let mut jobs = Vec::with_capacity(names.len());
        for name in names {
            let job = self.resolve(name)?;
            if job.is_enabled() {
                jobs.push(job);
            } else {
                log::info!("Job {} is disabled; skipping", job.name());
            }
        }
        Ok(jobs)
    }

    /// (registered name, job instance) for listing.
    pub fn instances(&self) -> Vec<(&str, Box<dyn DataJob>)> {
        self.entries
            .iter()
            .map(|(n, factory)| (n.as_str(), factory()))
            .collect()
    }
}
