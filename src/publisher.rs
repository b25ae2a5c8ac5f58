//! Publishes a completed phase: enumerates the files it changed, claims
//! them, and emits one `file` entanglement per file plus one entanglement
//! per exported symbol the source-text scanner recognizes.

use std::path::Path;

use git2::{Delta, DiffOptions, Repository};
use tracing::{instrument, warn};

use crate::errors::PublisherError;
use crate::fabric::{format_timestamp, Entanglement, EntanglementKind, EntanglementStatus, FabricStore};

pub struct Publisher<'a> {
    repo: Repository,
    fabric: &'a mut FabricStore,
}

impl<'a> Publisher<'a> {
    pub fn new(project_dir: &Path, fabric: &'a mut FabricStore) -> Result<Self, PublisherError> {
        let repo = Repository::open(project_dir)?;
        Ok(Self { repo, fabric })
    }

    #[instrument(skip(self), fields(phase_id))]
    pub fn publish_phase(
        &mut self,
        phase_id: &str,
        base_commit: &str,
        final_commit: &str,
    ) -> Result<usize, PublisherError> {
        let base_oid = git2::Oid::from_str(base_commit)?;
        let final_oid = git2::Oid::from_str(final_commit)?;
        let base_tree = self.repo.find_commit(base_oid)?.tree()?;
        let final_tree = self.repo.find_commit(final_oid)?.tree()?;

        let mut opts = DiffOptions::new();
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&final_tree), Some(&mut opts))?;

        let mut changed_paths = Vec::new();
        diff.foreach(
            &mut |delta, _progress| {
                if delta.status() == Delta::Deleted {
                    return true;
                }
                if let Some(path) = delta.new_file().path() {
                    changed_paths.push(path.to_path_buf());
                }
                true
            },
            None,
            None,
            None,
        )?;

        let now = format_timestamp(chrono::Utc::now());
        let mut entanglements = Vec::with_capacity(changed_paths.len());

        for path in &changed_paths {
            let path_str = path.to_string_lossy().to_string();
            if let Err(e) = self.fabric.claim_file(&path_str, phase_id) {
                warn!(file = %path_str, error = %e, "file claim conflict during publish");
            }

            entanglements.push(Entanglement {
                producer: phase_id.to_string(),
                kind: EntanglementKind::File,
                name: path_str.clone(),
                signature: None,
                package: None,
                status: EntanglementStatus::Fulfilled,
                created_at: now.clone(),
            });

            if is_test_path(path) {
                continue;
            }

            let abs = self.repo.workdir().map(|w| w.join(path)).unwrap_or_else(|| path.clone());
            match std::fs::read_to_string(&abs) {
                Ok(source) => match extract_symbols(path, &source) {
                    Some(symbols) => {
                        for sym in symbols {
                            entanglements.push(Entanglement {
                                producer: phase_id.to_string(),
                                kind: sym.kind,
                                name: sym.name,
                                signature: Some(sym.signature),
                                package: sym.package,
                                status: EntanglementStatus::Fulfilled,
                                created_at: now.clone(),
                            });
                        }
                    }
                    None => {
                        warn!(file = %path_str, "unrecognized extension, skipping symbol extraction");
                    }
                },
                Err(e) => {
                    warn!(file = %path_str, error = %e, "failed to read file for symbol extraction");
                }
            }
        }

        let count = entanglements.len();
        self.fabric.publish_contracts(&entanglements)?;
        Ok(count)
    }
}

fn is_test_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.contains("/tests/")
        || s.starts_with("tests/")
        || s.ends_with("_test.go")
        || s.ends_with(".test.ts")
        || s.ends_with(".test.tsx")
        || s.ends_with(".spec.ts")
}

struct Symbol {
    kind: EntanglementKind,
    name: String,
    signature: String,
    package: Option<String>,
}

fn extract_symbols(path: &Path, source: &str) -> Option<Vec<Symbol>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => Some(extract_rust_symbols(source)),
        Some("go") => Some(extract_go_symbols(source)),
        Some("ts") | Some("tsx") => Some(extract_typescript_symbols(source)),
        _ => None,
    }
}

fn extract_rust_symbols(source: &str) -> Vec<Symbol> {
    use regex::Regex;
    let fn_re = Regex::new(r"(?m)^\s*pub(?:\([^)]*\))?\s+(?:async\s+)?fn\s+(\w+)\s*(\([^)]*\)(?:\s*->\s*[^\{;]+)?)").unwrap();
    let type_re = Regex::new(r"(?m)^\s*pub(?:\([^)]*\))?\s+(struct|enum|trait|type)\s+(\w+)").unwrap();

    let mut out = Vec::new();
    for cap in fn_re.captures_iter(source) {
        out.push(Symbol {
            kind: EntanglementKind::Function,
            name: cap[1].to_string(),
            signature: format!("fn {}{}", &cap[1], cap[2].trim()),
            package: None,
        });
    }
    for cap in type_re.captures_iter(source) {
        let kind = match &cap[1] {
            "trait" => EntanglementKind::Interface,
            _ => EntanglementKind::Type,
        };
        out.push(Symbol {
            kind,
            name: cap[2].to_string(),
            signature: format!("{} {}", &cap[1], &cap[2]),
            package: None,
        });
    }
    out
}

fn extract_go_symbols(source: &str) -> Vec<Symbol> {
    use regex::Regex;
    let package_re = Regex::new(r"(?m)^package\s+(\w+)").unwrap();
    let package = package_re.captures(source).map(|c| c[1].to_string());

    let func_re = Regex::new(r"(?m)^func\s+(?:\(\s*\w+\s+\*?(\w+)\s*\)\s+)?(\w+)\s*(\([^)]*\)(?:\s*\([^)]*\)|\s*[\w\*\[\]\.]+)?)").unwrap();
    let type_re = Regex::new(r"(?m)^type\s+(\w+)\s+(struct|interface)\b").unwrap();

    let mut out = Vec::new();
    for cap in func_re.captures_iter(source) {
        match cap.get(1) {
            Some(recv) => out.push(Symbol {
                kind: EntanglementKind::Method,
                name: format!("{}.{}", recv.as_str(), &cap[2]),
                signature: format!("func ({}) {}{}", recv.as_str(), &cap[2], cap[3].trim()),
                package: package.clone(),
            }),
            None => out.push(Symbol {
                kind: EntanglementKind::Function,
                name: cap[2].to_string(),
                signature: format!("func {}{}", &cap[2], cap[3].trim()),
                package: package.clone(),
            }),
        }
    }
    for cap in type_re.captures_iter(source) {
        let kind = if &cap[2] == "interface" {
            EntanglementKind::Interface
        } else {
            EntanglementKind::Type
        };
        out.push(Symbol {
            kind,
            name: cap[1].to_string(),
            signature: format!("type {} {}", &cap[1], &cap[2]),
            package: package.clone(),
        });
    }
    out
}

fn extract_typescript_symbols(source: &str) -> Vec<Symbol> {
    use regex::Regex;
    let fn_re = Regex::new(r"(?m)^export\s+(?:async\s+)?function\s+(\w+)\s*(\([^)]*\)(?:\s*:\s*[^\{;]+)?)").unwrap();
    let class_re = Regex::new(r"(?m)^export\s+(?:abstract\s+)?class\s+(\w+)").unwrap();
    let iface_re = Regex::new(r"(?m)^export\s+interface\s+(\w+)").unwrap();
    let type_re = Regex::new(r"(?m)^export\s+type\s+(\w+)").unwrap();

    let mut out = Vec::new();
    for cap in fn_re.captures_iter(source) {
        out.push(Symbol {
            kind: EntanglementKind::Function,
            name: cap[1].to_string(),
            signature: format!("function {}{}", &cap[1], cap[2].trim()),
            package: None,
        });
    }
    for cap in class_re.captures_iter(source) {
        out.push(Symbol {
            kind: EntanglementKind::Type,
            name: cap[1].to_string(),
            signature: format!("class {}", &cap[1]),
            package: None,
        });
    }
    for cap in iface_re.captures_iter(source) {
        out.push(Symbol {
            kind: EntanglementKind::Interface,
            name: cap[1].to_string(),
            signature: format!("interface {}", &cap[1]),
            package: None,
        });
    }
    for cap in type_re.captures_iter(source) {
        out.push(Symbol {
            kind: EntanglementKind::Type,
            name: cap[1].to_string(),
            signature: format!("type {}", &cap[1]),
            package: None,
        });
    }
    out
}
