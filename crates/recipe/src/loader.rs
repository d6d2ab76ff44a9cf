//! Recipe evaluation and package identification
//!
//! Loading happens in two phases. The async phase locates the recipe, reads
//! its assets and loads every recipe it depends on. The synchronous phase
//! evaluates the Starlark source against the frozen exports of those
//! dependencies. Only frozen modules and owned records cross an await point.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use starlark::environment::{FrozenModule, Globals, GlobalsBuilder, LibraryExtension, Module};
use starlark::eval::{Evaluator, ReturnFileLoader};
use starlark::syntax::{AstModule, Dialect};
use starlark::values::ValueLike;
use vessel_errors::{Error, RecipeError};
use vessel_events::{AppEvent, EventEmitter, EventSender, RecipeEvent};
use vessel_hash::{Sum, SumAlgo};
use vessel_types::host_constraints;

use crate::lookup::{optional_asset, ScriptData, ScriptLookup};
use crate::package::{Input, InputSource, InputSpec, ScriptPackage, SumsFile};
use crate::signature::{hash_dir, InputDigest, SignatureInput};
use crate::statement::{code_hash, validate, Statement};
use crate::values::{self, recipe_globals, PackageValue, Prototype};

/// Name under which a recipe's package is exported to dependents
pub const EXPORT_NAME: &str = "pkg";

/// Asset holding a recipe's recorded input sums
#[must_use]
pub fn sums_asset(name: &str) -> String {
    format!("{name}.sums.json")
}

/// Asset holding helper definitions exported alongside the package
#[must_use]
pub fn helpers_asset(name: &str) -> String {
    format!("{name}.helpers.star")
}

fn globals() -> Globals {
    GlobalsBuilder::extended_by(&[
        LibraryExtension::StructType,
        LibraryExtension::Print,
        LibraryExtension::Json,
    ])
    .with(recipe_globals)
    .build()
}

fn parse(file: &str, source: String) -> Result<AstModule, Error> {
    AstModule::parse(file, source, &Dialect::Extended).map_err(|e| {
        RecipeError::BadScript {
            name: file.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn eval_failed(name: &str, message: impl std::fmt::Display) -> Error {
    RecipeError::EvalFailed {
        name: name.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn bad_script(name: &str, message: impl Into<String>) -> Error {
    RecipeError::BadScript {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

/// A recipe after evaluation, before its inputs are resolved
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub name: String,
    pub version: Option<String>,
    pub inputs: Vec<(String, InputSpec)>,
    pub dependencies: Vec<Arc<ScriptPackage>>,
    pub instances: Vec<Arc<ScriptPackage>>,
    pub install: Option<Vec<Statement>>,
    pub hook: Option<Vec<Statement>>,
}

/// What `inspect` reports about a recipe
#[derive(Debug, Clone)]
pub struct Inspection {
    pub evaluated: Evaluated,
    /// Directory the recipe was read from, when it is local
    pub dir: Option<PathBuf>,
    pub sums: SumsFile,
}

struct Prepared {
    data: Arc<dyn ScriptData>,
    source: String,
    helpers: Option<String>,
    sums: SumsFile,
    deps: Vec<(String, FrozenModule)>,
}

#[derive(Clone)]
struct Loaded {
    package: Arc<ScriptPackage>,
    exports: FrozenModule,
}

/// Loads recipes by name and assigns their package ids
///
/// Results are memoized for the lifetime of the loader, so a recipe shared by
/// several dependents is evaluated once.
pub struct ScriptLoader {
    lookup: ScriptLookup,
    tx: EventSender,
    loaded: Mutex<HashMap<String, Loaded>>,
}

impl std::fmt::Debug for ScriptLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLoader")
            .field("paths", &self.lookup.paths())
            .finish_non_exhaustive()
    }
}

impl ScriptLoader {
    #[must_use]
    pub fn new(lookup: ScriptLookup, tx: EventSender) -> Self {
        Self {
            lookup,
            tx,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn lookup(&self) -> &ScriptLookup {
        &self.lookup
    }

    fn memo(&self, name: &str) -> Option<Loaded> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Load and identify the recipe `name` together with its dependencies
    ///
    /// # Errors
    ///
    /// Returns a `RecipeError` if the recipe cannot be found, evaluated or
    /// identified, or if it takes part in a dependency cycle.
    pub async fn load(&self, name: &str) -> Result<Arc<ScriptPackage>, Error> {
        let mut stack = Vec::new();
        Ok(self.load_inner(name, &mut stack).await?.package)
    }

    /// Exported namespace of a recipe (its package plus helpers)
    ///
    /// # Errors
    ///
    /// Returns an error if the recipe cannot be loaded.
    pub async fn exports(&self, name: &str) -> Result<FrozenModule, Error> {
        let mut stack = Vec::new();
        Ok(self.load_inner(name, &mut stack).await?.exports)
    }

    /// Evaluate a recipe without resolving its inputs or assigning an id
    ///
    /// # Errors
    ///
    /// Returns an error if the recipe or one of its dependencies fails to load.
    pub async fn inspect(&self, name: &str) -> Result<Inspection, Error> {
        let mut stack = Vec::new();
        let prepared = self.prepare(name, &mut stack).await?;
        let evaluated = evaluate(name, &prepared)?;
        Ok(Inspection {
            evaluated,
            dir: prepared.data.local_dir().map(Path::to_path_buf),
            sums: prepared.sums,
        })
    }

    async fn load_inner(&self, name: &str, stack: &mut Vec<String>) -> Result<Loaded, Error> {
        if let Some(loaded) = self.memo(name) {
            return Ok(loaded);
        }

        let prepared = self.prepare(name, stack).await?;
        let evaluated = evaluate(name, &prepared)?;
        let package = Arc::new(self.identify(name, &prepared, evaluated).await?);
        let exports = build_exports(name, &package, prepared.helpers.as_deref(), &prepared.deps)?;

        let loaded = Loaded { package, exports };
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), loaded.clone());

        tracing::debug!(name, id = %loaded.package.id, "loaded recipe");
        self.tx.emit(AppEvent::Recipe(RecipeEvent::Loaded {
            name: name.to_string(),
            id: loaded.package.id.to_string(),
        }));
        Ok(loaded)
    }

    fn load_boxed<'a>(
        &'a self,
        name: &'a str,
        stack: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Loaded, Error>> + Send + 'a>> {
        Box::pin(self.load_inner(name, stack))
    }

    async fn prepare(&self, name: &str, stack: &mut Vec<String>) -> Result<Prepared, Error> {
        if let Some(pos) = stack.iter().position(|s| s == name) {
            let mut chain: Vec<&str> = stack[pos..].iter().map(String::as_str).collect();
            chain.push(name);
            return Err(RecipeError::CircularDependency {
                chain: chain.join(" -> "),
            }
            .into());
        }

        let data = self.lookup.load(name).await?;
        let source = String::from_utf8(data.script_bytes().to_vec())
            .map_err(|e| bad_script(name, format!("recipe is not UTF-8: {e}")))?;

        let helpers = optional_asset(data.as_ref(), &helpers_asset(name))
            .await?
            .map(String::from_utf8)
            .transpose()
            .map_err(|e| bad_script(name, format!("helpers are not UTF-8: {e}")))?;

        let sums = match optional_asset(data.as_ref(), &sums_asset(name)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| bad_script(name, format!("invalid sums file: {e}")))?,
            None => SumsFile::default(),
        };

        let mut modules: Vec<String> = parse(name, source.clone())?
            .loads()
            .iter()
            .map(|l| l.module_id.to_string())
            .collect();
        if let Some(helpers) = &helpers {
            modules.extend(
                parse(&helpers_asset(name), helpers.clone())?
                    .loads()
                    .iter()
                    .map(|l| l.module_id.to_string()),
            );
        }
        modules.sort();
        modules.dedup();

        stack.push(name.to_string());
        let mut deps = Vec::with_capacity(modules.len());
        for module in modules {
            let loaded = self.load_boxed(&module, stack).await;
            match loaded {
                Ok(loaded) => deps.push((module, loaded.exports)),
                Err(e) => {
                    stack.pop();
                    return Err(e);
                }
            }
        }
        stack.pop();

        Ok(Prepared {
            data,
            source,
            helpers,
            sums,
            deps,
        })
    }

    async fn identify(
        &self,
        name: &str,
        prepared: &Prepared,
        evaluated: Evaluated,
    ) -> Result<ScriptPackage, Error> {
        let mut inputs = Vec::with_capacity(evaluated.inputs.len());
        let mut digests = Vec::with_capacity(evaluated.inputs.len());

        for (input_name, spec) in &evaluated.inputs {
            let (input, signature_path) =
                resolve_input(name, prepared, input_name, spec).await?;
            digests.push(InputDigest {
                name: input_name.clone(),
                path: signature_path,
                algo: input.sum.algo.as_str().to_string(),
                digest: input.sum.digest_bytes()?,
            });
            inputs.push(input);
        }

        let install = evaluated
            .install
            .as_deref()
            .map(code_hash)
            .transpose()?;

        let dependencies = evaluated
            .dependencies
            .iter()
            .chain(evaluated.instances.iter())
            .map(|d| &d.id)
            .collect();

        let id = SignatureInput {
            name: &evaluated.name,
            version: evaluated.version.as_deref().unwrap_or_default(),
            inputs: digests,
            install,
            dependencies,
        }
        .calculate();

        Ok(ScriptPackage {
            name: evaluated.name,
            version: id.version().to_string(),
            id,
            repo: prepared.data.repo().to_string(),
            inputs,
            dependencies: evaluated.dependencies,
            instances: evaluated.instances,
            install: evaluated.install,
            hook: evaluated.hook,
            constraints: host_constraints(),
        })
    }
}

async fn resolve_input(
    name: &str,
    prepared: &Prepared,
    input_name: &str,
    spec: &InputSpec,
) -> Result<(Input, String), Error> {
    let input = |source, sum| Input {
        name: input_name.to_string(),
        source,
        sum,
        into: spec.into.clone(),
        chdir: spec.chdir,
    };

    if let Some(dir) = &spec.dir {
        if Path::new(dir)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(RecipeError::InvalidPath { path: dir.clone() }.into());
        }
        let base = prepared
            .data
            .local_dir()
            .ok_or_else(|| bad_script(name, "dir() inputs need a local recipe"))?;
        let path = base.join(dir);
        let root = path.clone();
        let hash = tokio::task::spawn_blocking(move || hash_dir(&root))
            .await
            .map_err(|e| Error::internal(format!("hashing {dir}: {e}")))??;
        let sum = Sum::new(SumAlgo::B2, hash.to_base58());
        let source = InputSource::Dir {
            path,
            linked: spec.linked,
        };
        return Ok((input(source, sum), dir.clone()));
    }

    let Some(path) = spec.path.as_deref() else {
        return Err(bad_script(
            name,
            format!("input {input_name} has no path for {}", std::env::consts::OS),
        ));
    };

    if spec.is_url() {
        let sum = spec
            .sum
            .clone()
            .or_else(|| prepared.sums.get(path).cloned())
            .ok_or_else(|| RecipeError::MissingSum {
                name: name.to_string(),
                path: path.to_string(),
            })?;
        let source = InputSource::Url {
            url: path.to_string(),
        };
        return Ok((input(source, sum), path.to_string()));
    }

    if path.starts_with("./") {
        if Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(RecipeError::InvalidPath {
                path: path.to_string(),
            }
            .into());
        }
        let data: Arc<[u8]> = prepared.data.asset(path).await?.into();
        let sum = Sum::b2_of(&data);
        if let Some(declared) = &spec.sum {
            if declared.algo == SumAlgo::B2 && declared != &sum {
                return Err(bad_script(
                    name,
                    format!("sum mismatch for {path}: expected {declared}, got {sum}"),
                ));
            }
        }
        let source = InputSource::Asset {
            path: path.to_string(),
            data,
        };
        return Ok((input(source, sum), path.to_string()));
    }

    Err(bad_script(
        name,
        format!("input path must be a URL or start with ./: {path}"),
    ))
}

/// Evaluate the recipe source against its dependencies' exports
fn evaluate(name: &str, prepared: &Prepared) -> Result<Evaluated, Error> {
    let ast = parse(&format!("{name}.star"), prepared.source.clone())?;
    let globals = globals();
    let modules: HashMap<&str, &FrozenModule> = prepared
        .deps
        .iter()
        .map(|(id, module)| (id.as_str(), module))
        .collect();
    let loader = ReturnFileLoader { modules: &modules };

    let module = Module::new();
    let mut eval = Evaluator::new(&module);
    eval.set_loader(&loader);

    let value = eval
        .eval_module(ast, &globals)
        .map_err(|e| eval_failed(name, e))?;

    let Some(proto) = value.downcast_ref::<Prototype>() else {
        return Err(bad_script(
            name,
            "recipe must end with a pkg(...) expression",
        ));
    };

    let inputs = match proto.input {
        Some(v) => values::input_entries(v).map_err(|e| bad_script(name, e.to_string()))?,
        None => Vec::new(),
    };

    let (dependencies, instances) = match proto.dependencies {
        Some(v) => values::dependency_entries(v).map_err(|e| bad_script(name, e.to_string()))?,
        None => (Vec::new(), Vec::new()),
    };

    let mut record = |procedure: Option<_>| -> Result<Option<Vec<Statement>>, Error> {
        let Some(procedure) = procedure else {
            return Ok(None);
        };
        let statements =
            values::record(&mut eval, procedure).map_err(|e| eval_failed(name, e))?;
        validate(&statements)?;
        Ok(Some(statements))
    };
    let install = record(proto.install)?;
    let hook = record(proto.hook)?;

    Ok(Evaluated {
        name: proto.name.clone(),
        version: proto.version.clone(),
        inputs,
        dependencies,
        instances,
        install,
        hook,
    })
}

/// Freeze the namespace dependents see when they `load(...)` this recipe
fn build_exports(
    name: &str,
    package: &Arc<ScriptPackage>,
    helpers: Option<&str>,
    deps: &[(String, FrozenModule)],
) -> Result<FrozenModule, Error> {
    let module = Module::new();
    module.set(
        EXPORT_NAME,
        module.heap().alloc(PackageValue::new(Arc::clone(package))),
    );

    if let Some(helpers) = helpers {
        let file = helpers_asset(name);
        let ast = parse(&file, helpers.to_string())?;
        let globals = globals();
        let modules: HashMap<&str, &FrozenModule> =
            deps.iter().map(|(id, m)| (id.as_str(), m)).collect();
        let loader = ReturnFileLoader { modules: &modules };
        let mut eval = Evaluator::new(&module);
        eval.set_loader(&loader);
        eval.eval_module(ast, &globals)
            .map_err(|e| eval_failed(&file, e))?;
    }

    module
        .freeze()
        .map_err(|e| eval_failed(name, anyhow::Error::from(e)))
}
