//! Symbols
//!
//! A `Symbol` names something a module may provide:
//! - `Symbol::Class` - a canonical dotted class name (`com.x.Foo`)
//! - `Symbol::Resource` - a slash-separated resource path (`com/x/foo.txt`)
//!
//! Both forms map onto a single archive entry path, which is the key used by
//! the archive index and by the resolver caches. A class and the resource
//! naming the same entry therefore share one cache slot.

use std::fmt;

use thiserror::Error;

/// Suffix of class entries inside an archive.
pub const CLASS_SUFFIX: &str = ".class";

/// A malformed symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("invalid symbol '{symbol}': {reason}")]
    Invalid { symbol: String, reason: &'static str },
}

/// A class name or resource path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Canonical dotted class name, e.g. `com.x.Foo` or `com.x.Outer$Inner`.
    Class(String),
    /// Slash-separated resource path, e.g. `com/x/foo.txt`.
    Resource(String),
}

impl Symbol {
    /// Create a class symbol, validating the dotted name.
    pub fn class(name: impl Into<String>) -> Result<Self, SymbolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(invalid(name, "empty class name"));
        }
        if name.contains('/') {
            return Err(invalid(name, "class names use '.' separators"));
        }
        if name.split('.').any(str::is_empty) {
            return Err(invalid(name, "empty package segment"));
        }
        Ok(Symbol::Class(name))
    }

    /// Create a resource symbol. A single leading `/` is stripped.
    pub fn resource(path: impl AsRef<str>) -> Result<Self, SymbolError> {
        let raw = path.as_ref();
        let path = raw.strip_prefix('/').unwrap_or(raw);
        if path.is_empty() {
            return Err(invalid(raw.to_string(), "empty resource path"));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(invalid(raw.to_string(), "'..' segments are not allowed"));
        }
        Ok(Symbol::Resource(path.to_string()))
    }

    /// The archive entry path this symbol maps to.
    pub fn entry_path(&self) -> String {
        match self {
            Symbol::Class(name) => format!("{}{}", name.replace('.', "/"), CLASS_SUFFIX),
            Symbol::Resource(path) => path.clone(),
        }
    }

    /// The package of a class symbol (`com.x` for `com.x.Foo`).
    ///
    /// Returns `None` for resources and for classes in the default package.
    pub fn package(&self) -> Option<&str> {
        match self {
            Symbol::Class(name) => name.rsplit_once('.').map(|(pkg, _)| pkg),
            Symbol::Resource(_) => None,
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(self, Symbol::Class(_))
    }

    /// The symbol as the caller spelled it.
    pub fn as_str(&self) -> &str {
        match self {
            Symbol::Class(name) => name,
            Symbol::Resource(path) => path,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Class(name) => write!(f, "class {}", name),
            Symbol::Resource(path) => write!(f, "resource {}", path),
        }
    }
}

fn invalid(symbol: String, reason: &'static str) -> SymbolError {
    SymbolError::Invalid { symbol, reason }
}

/// Package name for a class entry path (`com/x/Foo.class` -> `com.x`).
pub fn package_of_entry(entry: &str) -> Option<String> {
    let stem = entry.strip_suffix(CLASS_SUFFIX)?;
    stem.rsplit_once('/').map(|(pkg, _)| pkg.replace('/', "."))
}
