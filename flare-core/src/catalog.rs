//! Source catalog
//!
//! Keeps the list of capturable sources reported by a [`SourceProvider`] and
//! the current selection. Enumeration replaces the list wholesale; the
//! selection is stored by index and survives re-enumeration when a source
//! with the same name is still present.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{CaptureError, Result};
use crate::types::CaptureSource;

/// Something that can report capturable sources
pub trait SourceProvider {
    /// Query the platform for sources, in platform order
    fn enumerate_sources(&mut self) -> Result<Vec<CaptureSource>>;
}

/// Catalog of capture sources
#[derive(Debug, Default)]
pub struct SourceCatalog {
    sources: Vec<CaptureSource>,
    selected: Option<usize>,
    enumerated: bool,
    frozen: bool,
}

impl SourceCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog with a fresh enumeration
    ///
    /// Fails with [`CaptureError::NoSourcesFound`] when the provider reports
    /// nothing usable, and with a configuration error while frozen. On
    /// failure the previous catalog is kept.
    pub fn enumerate<P>(&mut self, provider: &mut P) -> Result<&[CaptureSource]>
    where
        P: SourceProvider + ?Sized,
    {
        if self.frozen {
            return Err(CaptureError::config(
                "Cannot re-enumerate sources while capturing",
            ));
        }

        let found = provider.enumerate_sources()?;
        let sources = dedupe_names(
            found
                .into_iter()
                .filter(|s| !s.name.is_empty() && !s.geometry.is_empty())
                .collect(),
        );
        if sources.is_empty() {
            return Err(CaptureError::NoSourcesFound);
        }

        let previous = self.selected().map(|s| s.name.clone());
        self.selected = previous
            .and_then(|name| sources.iter().position(|s| s.name == name))
            .or(Some(0));
        self.sources = sources;
        self.enumerated = true;

        info!("Found {} capture sources", self.sources.len());
        for source in &self.sources {
            debug!("  {}", source);
        }
        if let Some(source) = self.selected() {
            debug!("Selected source: {}", source.name);
        }

        Ok(&self.sources)
    }

    /// Select a source by name
    ///
    /// An unknown name leaves the current selection untouched.
    pub fn select(&mut self, name: &str) -> Result<()> {
        if self.frozen {
            return Err(CaptureError::config("Cannot change source while capturing"));
        }
        let index = self
            .sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CaptureError::SourceNotFound(name.to_string()))?;
        self.selected = Some(index);
        info!("Selected source: {}", name);
        Ok(())
    }

    /// Source names, enumerating once on first use
    pub fn list<P>(&mut self, provider: &mut P) -> Result<Vec<String>>
    where
        P: SourceProvider + ?Sized,
    {
        if !self.enumerated {
            self.enumerate(provider)?;
        }
        Ok(self.names())
    }

    /// Source names in catalog order
    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    /// All sources in catalog order
    pub fn sources(&self) -> &[CaptureSource] {
        &self.sources
    }

    /// Look up a source by name
    pub fn get(&self, name: &str) -> Option<&CaptureSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// The selected source
    pub fn selected(&self) -> Option<&CaptureSource> {
        self.selected.and_then(|i| self.sources.get(i))
    }

    /// Whether an enumeration has succeeded
    pub fn is_enumerated(&self) -> bool {
        self.enumerated
    }

    /// Reject changes until [`unfreeze`](Self::unfreeze)
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Allow changes again
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Whether changes are currently rejected
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Make names unique by suffixing repeats with " (2)", " (3)", ...
fn dedupe_names(mut sources: Vec<CaptureSource>) -> Vec<CaptureSource> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for source in &mut sources {
        let count = seen.entry(source.name.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            source.name = format!("{} ({})", source.name, count);
        }
    }
    sources
}
