//! pag-profile shared object map module.
//!
//! The sampler records absolute addresses; the static analyzer works with
//! addresses relative to each module. The map (`<start> <end> <path>` lines,
//! hex addresses) translates between the two.

use crate::error::{Error, Result};
use crate::{filebuf, Address};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;

/// One mapped module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// First mapped address.
    pub start: Address,
    /// Last mapped address (exclusive).
    pub end: Address,
    /// Path of the module file.
    pub path: String,
}

impl Module {
    /// Checks if the module file name equals `name` (or its file name does).
    pub fn is_named(&self, name: &str) -> bool {
        let file = |p: &str| p.rsplit('/').next().unwrap_or(p).to_string();
        self.path == name || file(&self.path) == file(name)
    }
}

/// Address ranges of the modules loaded into the analyzed processes.
#[derive(Debug, Clone, Default)]
pub struct SharedObjectMap {
    modules: Vec<Module>,
}

impl SharedObjectMap {
    /// Reads a shared object map file.
    pub fn read_file(filepath: &Path) -> Result<Self> {
        tracing::debug!("SharedObjectMap.read_file {:?}", filepath);
        SharedObjectMap::read(filebuf::open(filepath)?)
    }

    /// Parses `<start> <end> <path>` lines.
    pub fn read(reader: impl BufRead) -> Result<Self> {
        lazy_static! {
            static ref MAPPING: Regex =
                Regex::new(r"^\s*(?:0x)?([[:xdigit:]]+)\s+(?:0x)?([[:xdigit:]]+)\s+(.+?)\s*$")
                    .expect("Invalid regex");
        }

        let mut modules = Vec::new();
        filebuf::for_each_line(reader, |line, lc| {
            let err = || Error::SoMapParsing(line.into(), lc);
            let caps = MAPPING.captures(line).ok_or_else(err)?;
            let start = Address::from_str_radix(&caps[1], 16).map_err(|_| err())?;
            let end = Address::from_str_radix(&caps[2], 16).map_err(|_| err())?;
            modules.push(Module {
                start,
                end,
                path: caps[3].to_string(),
            });
            Ok(())
        })?;
        modules.sort_by_key(|m| m.start);
        Ok(SharedObjectMap { modules })
    }

    /// Returns the number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Checks if no module is mapped.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Returns the module mapping the address.
    pub fn lookup(&self, address: Address) -> Option<&Module> {
        let i = self.modules.partition_point(|m| m.start <= address);
        let module = self.modules.get(i.checked_sub(1)?)?;
        (address < module.end).then(|| module)
    }

    /// Returns the address relative to its module, and the module path.
    pub fn translate(&self, address: Address) -> (Address, Option<&str>) {
        match self.lookup(address) {
            Some(m) => (address - m.start, Some(m.path.as_str())),
            None => (address, None),
        }
    }

    /// Rewrites addresses of module `binary` relative to its load address.
    /// Returns the number of rewritten frames.
    pub fn rebase(&self, call_path: &mut [Address], binary: &str) -> usize {
        let mut rebased = 0;
        for address in call_path.iter_mut() {
            if let Some(m) = self.lookup(*address) {
                if m.is_named(binary) {
                    *address -= m.start;
                    rebased += 1;
                }
            }
        }
        rebased
    }
}
