//! Install statement tree
//!
//! Install and hook procedures do not touch the filesystem while a recipe is
//! evaluated. Every run-context call records a [`Statement`]; the resulting
//! tree is hashed into the package signature and later executed by the
//! installer with the placeholders below bound to real paths.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use vessel_errors::RecipeError;
use vessel_hash::{Hash, Sum};

/// Stands in for the artifact directory (`<store>/<id>`)
pub const PREFIX_VAR: &str = "@@prefix@@";
/// Stands in for the build root (after auto-chdir)
pub const BUILD_VAR: &str = "@@build@@";
/// Stands in for the top of the build directory
pub const TOP_VAR: &str = "@@top@@";
/// Stands in for the store root, used by dependency `prefix` attributes
pub const STORE_VAR: &str = "@@store@@";

/// One recorded run-context operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    System {
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dir: Option<String>,
    },
    Shell {
        code: String,
    },
    ApplyPatch {
        patch: String,
    },
    Inreplace {
        file: String,
        pattern: String,
        target: String,
    },
    InreplaceRe {
        file: String,
        pattern: String,
        target: String,
    },
    RmF {
        path: String,
    },
    RmRf {
        path: String,
    },
    SetEnv {
        key: String,
        value: String,
    },
    AppendEnv {
        key: String,
        value: String,
    },
    PrependEnv {
        key: String,
        value: String,
    },
    Link {
        sources: Vec<String>,
        target: String,
    },
    InstallFiles {
        target: String,
        pattern: String,
        symlink: bool,
    },
    WriteFile {
        target: String,
        data: String,
    },
    ChangeDir {
        dir: String,
        body: Vec<Statement>,
    },
    MakeDir {
        dir: String,
    },
    SetRoot {
        dir: String,
    },
    Download {
        url: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sum: Option<Sum>,
    },
    Unpack {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
}

/// Concrete values for the path placeholders of one execution
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub prefix: String,
    pub build: String,
    pub top: String,
    pub store: String,
}

impl Bindings {
    /// Replace every placeholder in `text`
    #[must_use]
    pub fn expand(&self, text: &str) -> String {
        text.replace(PREFIX_VAR, &self.prefix)
            .replace(BUILD_VAR, &self.build)
            .replace(TOP_VAR, &self.top)
            .replace(STORE_VAR, &self.store)
    }
}

impl Statement {
    /// Copy of this statement with every placeholder expanded
    #[must_use]
    pub fn bind(&self, b: &Bindings) -> Statement {
        let e = |s: &String| b.expand(s);
        match self {
            Self::System { args, dir } => Self::System {
                args: args.iter().map(e).collect(),
                dir: dir.as_ref().map(e),
            },
            Self::Shell { code } => Self::Shell { code: e(code) },
            Self::ApplyPatch { patch } => Self::ApplyPatch { patch: e(patch) },
            Self::Inreplace {
                file,
                pattern,
                target,
            } => Self::Inreplace {
                file: e(file),
                pattern: e(pattern),
                target: e(target),
            },
            Self::InreplaceRe {
                file,
                pattern,
                target,
            } => Self::InreplaceRe {
                file: e(file),
                pattern: pattern.clone(),
                target: e(target),
            },
            Self::RmF { path } => Self::RmF { path: e(path) },
            Self::RmRf { path } => Self::RmRf { path: e(path) },
            Self::SetEnv { key, value } => Self::SetEnv {
                key: key.clone(),
                value: e(value),
            },
            Self::AppendEnv { key, value } => Self::AppendEnv {
                key: key.clone(),
                value: e(value),
            },
            Self::PrependEnv { key, value } => Self::PrependEnv {
                key: key.clone(),
                value: e(value),
            },
            Self::Link { sources, target } => Self::Link {
                sources: sources.iter().map(e).collect(),
                target: e(target),
            },
            Self::InstallFiles {
                target,
                pattern,
                symlink,
            } => Self::InstallFiles {
                target: e(target),
                pattern: e(pattern),
                symlink: *symlink,
            },
            Self::WriteFile { target, data } => Self::WriteFile {
                target: e(target),
                data: e(data),
            },
            Self::ChangeDir { dir, body } => Self::ChangeDir {
                dir: e(dir),
                body: body.iter().map(|s| s.bind(b)).collect(),
            },
            Self::MakeDir { dir } => Self::MakeDir { dir: e(dir) },
            Self::SetRoot { dir } => Self::SetRoot { dir: e(dir) },
            Self::Download { url, path, sum } => Self::Download {
                url: url.clone(),
                path: e(path),
                sum: sum.clone(),
            },
            Self::Unpack { path, output } => Self::Unpack {
                path: e(path),
                output: output.as_ref().map(e),
            },
        }
    }

    /// Filesystem paths named by this statement (not its nested body)
    fn paths(&self) -> Vec<&str> {
        match self {
            Self::System { dir, .. } => dir.iter().map(String::as_str).collect(),
            Self::Inreplace { file, .. } | Self::InreplaceRe { file, .. } => vec![file.as_str()],
            Self::RmF { path } | Self::RmRf { path } => vec![path.as_str()],
            Self::Link { sources, target } => sources
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(target.as_str()))
                .collect(),
            Self::InstallFiles {
                target, pattern, ..
            } => vec![target.as_str(), pattern.as_str()],
            Self::WriteFile { target, .. } => vec![target.as_str()],
            Self::ChangeDir { dir, .. } | Self::MakeDir { dir } | Self::SetRoot { dir } => {
                vec![dir.as_str()]
            }
            Self::Download { path, .. } => vec![path.as_str()],
            Self::Unpack { path, output } => std::iter::once(path.as_str())
                .chain(output.iter().map(String::as_str))
                .collect(),
            Self::Shell { .. }
            | Self::ApplyPatch { .. }
            | Self::SetEnv { .. }
            | Self::AppendEnv { .. }
            | Self::PrependEnv { .. } => Vec::new(),
        }
    }
}

/// Reject any statement naming a path with a `..` component
///
/// # Errors
///
/// Returns `RecipeError::InvalidPath` for the first offending path.
pub fn validate(statements: &[Statement]) -> Result<(), RecipeError> {
    for statement in statements {
        for path in statement.paths() {
            if Path::new(path)
                .components()
                .any(|c| matches!(c, Component::ParentDir))
            {
                return Err(RecipeError::InvalidPath {
                    path: path.to_string(),
                });
            }
        }

        if let Statement::ChangeDir { body, .. } = statement {
            validate(body)?;
        }
    }
    Ok(())
}

/// Stable hash of a statement tree, fed into package signatures
///
/// # Errors
///
/// Returns an error if the tree cannot be serialized.
pub fn code_hash(statements: &[Statement]) -> Result<Hash, serde_json::Error> {
    let encoded = serde_json::to_vec(statements)?;
    Ok(Hash::from_data(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_expands_placeholders_recursively() {
        let tree = vec![Statement::ChangeDir {
            dir: format!("{BUILD_VAR}/src"),
            body: vec![Statement::System {
                args: vec!["./configure".into(), format!("--prefix={PREFIX_VAR}")],
                dir: None,
            }],
        }];

        let bindings = Bindings {
            prefix: "/s/abc-p1-1".into(),
            build: "/b/build-abc".into(),
            top: "/b".into(),
            store: "/s".into(),
        };

        let bound: Vec<_> = tree.iter().map(|s| s.bind(&bindings)).collect();
        assert_eq!(
            bound,
            vec![Statement::ChangeDir {
                dir: "/b/build-abc/src".into(),
                body: vec![Statement::System {
                    args: vec!["./configure".into(), "--prefix=/s/abc-p1-1".into()],
                    dir: None,
                }],
            }]
        );
    }

    #[test]
    fn test_validate_rejects_parent_components() {
        let ok = vec![Statement::RmRf {
            path: "share/doc..old".into(),
        }];
        assert!(validate(&ok).is_ok());

        let nested = vec![Statement::ChangeDir {
            dir: "src".into(),
            body: vec![Statement::WriteFile {
                target: "../escape".into(),
                data: String::new(),
            }],
        }];
        assert!(matches!(
            validate(&nested),
            Err(RecipeError::InvalidPath { path }) if path == "../escape"
        ));
    }

    #[test]
    fn test_code_hash_tracks_content() {
        let a = vec![Statement::Shell { code: "make".into() }];
        let b = vec![Statement::Shell { code: "make ".into() }];
        assert_eq!(code_hash(&a).unwrap(), code_hash(&a.clone()).unwrap());
        assert_ne!(code_hash(&a).unwrap(), code_hash(&b).unwrap());
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let json = serde_json::to_string(&Statement::MakeDir { dir: "bin".into() }).unwrap();
        assert_eq!(json, r#"{"op":"make_dir","dir":"bin"}"#);
    }
}
