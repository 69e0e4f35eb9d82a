//! Versioned plugin identities.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Class name + version + minimum host version of one plugin build.
///
/// Version predicates only hold between identities of the same class; across
/// classes every ordering predicate is false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginIdent {
    pub class_name: String,
    pub version: Version,
    pub required_kernel_version: Version,
}

impl PluginIdent {
    pub fn new(class_name: impl Into<String>, version: Version) -> Self {
        Self {
            class_name: class_name.into(),
            version,
            required_kernel_version: Version::default(),
        }
    }

    pub fn requiring(mut self, kernel: Version) -> Self {
        self.required_kernel_version = kernel;
        self
    }

    /// Last segment of the dotted class name.
    pub fn simple_class_name(&self) -> &str {
        self.class_name
            .rsplit_once('.')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.class_name)
    }

    /// Everything before the last segment, empty for top-level classes.
    pub fn package_name(&self) -> &str {
        self.class_name
            .rsplit_once('.')
            .map(|(package, _)| package)
            .unwrap_or("")
    }

    pub fn is_same_class(&self, other: &PluginIdent) -> bool {
        self.class_name == other.class_name
    }

    pub fn is_lower(&self, other: &PluginIdent) -> bool {
        self.is_same_class(other) && self.version.is_lower(&other.version)
    }

    pub fn is_lower_or_equal(&self, other: &PluginIdent) -> bool {
        self.is_same_class(other) && self.version.is_lower_or_equal(&other.version)
    }

    pub fn is_greater(&self, other: &PluginIdent) -> bool {
        self.is_same_class(other) && self.version.is_greater(&other.version)
    }

    pub fn is_greater_or_equal(&self, other: &PluginIdent) -> bool {
        self.is_same_class(other) && self.version.is_greater_or_equal(&other.version)
    }

    /// Same class, strictly older build.
    pub fn is_older(&self, other: &PluginIdent) -> bool {
        self.is_lower(other)
    }

    /// Same class, strictly newer build.
    pub fn is_newer(&self, other: &PluginIdent) -> bool {
        self.is_greater(other)
    }

    /// Whether this build can run on the given host version.
    pub fn supports_host(&self, host: &Version) -> bool {
        self.required_kernel_version.is_lower_or_equal(host)
    }
}

impl fmt::Display for PluginIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class_name, self.version)
    }
}

/// Identity as advertised by a remote repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOnlineIdent {
    pub ident: PluginIdent,
    pub name: String,
    /// Location of the full descriptor XML.
    pub url: String,
}

/// Finds the entry for `class_name` in a list of identities.
pub fn find_ident<'a>(idents: &'a [PluginIdent], class_name: &str) -> Option<&'a PluginIdent> {
    idents.iter().find(|ident| ident.class_name == class_name)
}

/// Keeps only the highest version of each class, preserving first-seen order.
pub fn latest_of<I>(idents: I) -> Vec<PluginOnlineIdent>
where
    I: IntoIterator<Item = PluginOnlineIdent>,
{
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, PluginOnlineIdent> = HashMap::new();

    for candidate in idents {
        let class = candidate.ident.class_name.clone();
        match best.get(&class) {
            Some(current) if !candidate.ident.is_greater(&current.ident) => {}
            Some(_) => {
                best.insert(class, candidate);
            }
            None => {
                order.push(class.clone());
                best.insert(class, candidate);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|class| best.remove(&class))
        .collect()
}
