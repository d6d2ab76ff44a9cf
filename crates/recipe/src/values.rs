#![allow(clippy::needless_lifetimes, clippy::unnecessary_wraps)]
//! Starlark values and globals exposed to recipes

use std::cell::RefCell;
use std::fmt::{self, Display};
use std::rc::Rc;
use std::sync::Arc;

use allocative::Allocative;
use starlark::environment::{GlobalsBuilder, Methods, MethodsBuilder, MethodsStatic};
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::dict::DictRef;
use starlark::values::list::ListRef;
use starlark::values::none::NoneType;
use starlark::values::tuple::{TupleRef, UnpackTuple};
use starlark::values::{
    AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Tracer, Value, ValueLike,
};
use starlark_derive::{starlark_value, NoSerialize};
use vessel_hash::{Sum, SumAlgo};
use vessel_types::{host_constraints, PackageId};

use crate::package::{InputSpec, ScriptPackage};
use crate::signature::SignatureInput;
use crate::statement::{code_hash, validate, Statement, BUILD_VAR, PREFIX_VAR, STORE_VAR, TOP_VAR};

/// A single input created by `file(...)` or `dir(...)`
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct InputValue {
    #[allocative(skip)]
    pub spec: InputSpec,
}

impl Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.spec.path, &self.spec.dir) {
            (_, Some(dir)) => write!(f, "dir(path: {dir})"),
            (Some(path), None) => write!(f, "file(path: {path})"),
            (None, None) => f.write_str("file()"),
        }
    }
}

starlark_simple_value!(InputValue);

#[starlark_value(type = "input")]
impl<'v> StarlarkValue<'v> for InputValue {}

/// Named inputs created by `inputs(name=..., ...)`
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct InputSetValue {
    #[allocative(skip)]
    pub entries: Vec<(String, InputSpec)>,
}

impl Display for InputSetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|(n, _)| n.as_str()).collect();
        write!(f, "inputs({})", names.join(", "))
    }
}

starlark_simple_value!(InputSetValue);

#[starlark_value(type = "inputs")]
impl<'v> StarlarkValue<'v> for InputSetValue {}

/// A loaded package (or an instance) as seen from recipe code
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct PackageValue {
    #[allocative(skip)]
    pub package: Arc<ScriptPackage>,
    pub instance: bool,
}

impl PackageValue {
    #[must_use]
    pub fn new(package: Arc<ScriptPackage>) -> Self {
        Self {
            package,
            instance: false,
        }
    }
}

impl Display for PackageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<package {}>", self.package.id)
    }
}

starlark_simple_value!(PackageValue);

#[starlark_value(type = "package")]
impl<'v> StarlarkValue<'v> for PackageValue {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        matches!(attribute, "id" | "name" | "version" | "prefix")
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "id" => Some(heap.alloc(self.package.id.as_str())),
            "name" => Some(heap.alloc(self.package.name.as_str())),
            "version" => Some(heap.alloc(self.package.version.as_str())),
            "prefix" => Some(heap.alloc(format!("{STORE_VAR}/{}", self.package.id))),
            _ => None,
        }
    }
}

/// The record returned by `pkg(...)`
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct Prototype<'v> {
    pub name: String,
    pub version: Option<String>,
    pub input: Option<Value<'v>>,
    pub dependencies: Option<Value<'v>>,
    pub install: Option<Value<'v>>,
    pub hook: Option<Value<'v>>,
}

impl Display for Prototype<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg(name={}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, ", version={version}")?;
        }
        f.write_str(")")
    }
}

unsafe impl<'v> Trace<'v> for Prototype<'v> {
    fn trace(&mut self, tracer: &Tracer<'v>) {
        self.input.trace(tracer);
        self.dependencies.trace(tracer);
        self.install.trace(tracer);
        self.hook.trace(tracer);
    }
}

#[starlark_value(type = "prototype")]
impl<'v> StarlarkValue<'v> for Prototype<'v> {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        matches!(attribute, "name" | "version")
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "name" => Some(heap.alloc(self.name.as_str())),
            "version" => self.version.as_deref().map(|v| heap.alloc(v)),
            _ => None,
        }
    }
}

impl<'v> AllocValue<'v> for Prototype<'v> {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

/// Run context passed to `install` and `hook` procedures
///
/// Every method call appends a [`Statement`] to the innermost frame;
/// `chdir` opens a nested frame for the duration of its body.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct RunCtx {
    #[allocative(skip)]
    frames: Rc<RefCell<Vec<Vec<Statement>>>>,
    pub prefix: String,
    pub build: String,
    pub top: String,
}

impl RunCtx {
    /// A context whose paths are the placeholder variables
    #[must_use]
    pub fn placeholders() -> Self {
        Self {
            frames: Rc::new(RefCell::new(vec![Vec::new()])),
            prefix: PREFIX_VAR.to_string(),
            build: BUILD_VAR.to_string(),
            top: TOP_VAR.to_string(),
        }
    }

    fn record(&self, statement: Statement) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.push(statement);
        }
    }

    fn push_frame(&self) {
        self.frames.borrow_mut().push(Vec::new());
    }

    fn pop_frame(&self) -> Vec<Statement> {
        self.frames.borrow_mut().pop().unwrap_or_default()
    }

    /// Take the statements recorded at the top level
    #[must_use]
    pub fn take(&self) -> Vec<Statement> {
        self.frames
            .borrow_mut()
            .first_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

impl Display for RunCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunCtx(prefix={}, build={})", self.prefix, self.build)
    }
}

unsafe impl Trace<'_> for RunCtx {
    fn trace(&mut self, _tracer: &Tracer<'_>) {}
}

#[starlark_value(type = "RunCtx")]
impl<'v> StarlarkValue<'v> for RunCtx {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(run_ctx_methods)
    }

    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        matches!(attribute, "prefix" | "build" | "top")
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "prefix" => Some(heap.alloc(self.prefix.as_str())),
            "build" => Some(heap.alloc(self.build.as_str())),
            "top" => Some(heap.alloc(self.top.as_str())),
            _ => None,
        }
    }
}

impl<'v> AllocValue<'v> for RunCtx {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

fn run_ctx<'v>(this: Value<'v>) -> anyhow::Result<&'v RunCtx> {
    this.downcast_ref::<RunCtx>()
        .ok_or_else(|| anyhow::anyhow!("expected a run context, got {}", this.get_type()))
}

fn stringify(value: Value<'_>) -> String {
    value
        .unpack_str()
        .map_or_else(|| value.to_str(), str::to_string)
}

fn string_list(value: Value<'_>, what: &str) -> anyhow::Result<Vec<String>> {
    if let Some(s) = value.unpack_str() {
        return Ok(vec![s.to_string()]);
    }
    let list = ListRef::from_value(value)
        .ok_or_else(|| anyhow::anyhow!("{what} must be a string or a list of strings"))?;
    list.iter()
        .map(|v| {
            v.unpack_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("{what} entries must be strings"))
        })
        .collect()
}

/// Parse a `(algo, value)` pair
fn sum_from_value(value: Value<'_>) -> anyhow::Result<Sum> {
    let items: Vec<Value<'_>> = if let Some(tuple) = TupleRef::from_value(value) {
        tuple.content().to_vec()
    } else if let Some(list) = ListRef::from_value(value) {
        list.iter().collect()
    } else {
        anyhow::bail!("sum must be a tuple of (sum-type, sum)");
    };

    match items.as_slice() {
        [algo, digest] => {
            let algo = algo
                .unpack_str()
                .ok_or_else(|| anyhow::anyhow!("sum type must be a string"))?;
            let digest = digest
                .unpack_str()
                .ok_or_else(|| anyhow::anyhow!("sum value must be a string"))?;
            let algo: SumAlgo = algo.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(Sum::new(algo, digest))
        }
        _ => anyhow::bail!("sum must be a tuple of (sum-type, sum)"),
    }
}

/// Methods available on the run context
#[starlark_module]
fn run_ctx_methods(builder: &mut MethodsBuilder) {
    /// Run a program in the build directory (or `dir` below it)
    fn system<'v>(
        #[starlark(this)] this: Value<'v>,
        #[starlark(args)] args: UnpackTuple<Value<'v>>,
        #[starlark(require = named)] dir: Option<&str>,
    ) -> anyhow::Result<NoneType> {
        let argv: Vec<String> = args.items.into_iter().map(stringify).collect();
        if argv.is_empty() {
            anyhow::bail!("system() needs a program to run");
        }
        run_ctx(this)?.record(Statement::System {
            args: argv,
            dir: dir.map(str::to_string),
        });
        Ok(NoneType)
    }

    /// Run `code` with bash
    fn shell<'v>(#[starlark(this)] this: Value<'v>, code: &str) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::Shell {
            code: code.to_string(),
        });
        Ok(NoneType)
    }

    /// Apply a unified diff with `patch -p1`
    fn apply_patch<'v>(
        #[starlark(this)] this: Value<'v>,
        patch: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::ApplyPatch {
            patch: patch.to_string(),
        });
        Ok(NoneType)
    }

    fn inreplace<'v>(
        #[starlark(this)] this: Value<'v>,
        file: &str,
        pattern: &str,
        target: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::Inreplace {
            file: file.to_string(),
            pattern: pattern.to_string(),
            target: target.to_string(),
        });
        Ok(NoneType)
    }

    fn inreplace_re<'v>(
        #[starlark(this)] this: Value<'v>,
        file: &str,
        pattern: &str,
        target: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::InreplaceRe {
            file: file.to_string(),
            pattern: pattern.to_string(),
            target: target.to_string(),
        });
        Ok(NoneType)
    }

    fn rm_f<'v>(#[starlark(this)] this: Value<'v>, path: &str) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::RmF {
            path: path.to_string(),
        });
        Ok(NoneType)
    }

    fn rm_rf<'v>(#[starlark(this)] this: Value<'v>, path: &str) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::RmRf {
            path: path.to_string(),
        });
        Ok(NoneType)
    }

    fn set_env<'v>(
        #[starlark(this)] this: Value<'v>,
        key: &str,
        value: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::SetEnv {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(NoneType)
    }

    fn append_env<'v>(
        #[starlark(this)] this: Value<'v>,
        key: &str,
        value: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::AppendEnv {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(NoneType)
    }

    fn prepend_env<'v>(
        #[starlark(this)] this: Value<'v>,
        key: &str,
        value: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::PrependEnv {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(NoneType)
    }

    /// Symlink one or more paths into `target`
    fn link<'v>(
        #[starlark(this)] this: Value<'v>,
        path: Value<'v>,
        target: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::Link {
            sources: string_list(path, "link path")?,
            target: target.to_string(),
        });
        Ok(NoneType)
    }

    /// Copy (or symlink) every file matching `pattern` into `target`
    fn install_files<'v>(
        #[starlark(this)] this: Value<'v>,
        target: &str,
        pattern: &str,
        #[starlark(require = named)] symlink: Option<bool>,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::InstallFiles {
            target: target.to_string(),
            pattern: pattern.to_string(),
            symlink: symlink.unwrap_or(false),
        });
        Ok(NoneType)
    }

    fn write_file<'v>(
        #[starlark(this)] this: Value<'v>,
        target: &str,
        data: &str,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::WriteFile {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(NoneType)
    }

    /// Run `body` with `dir` as the working directory
    fn chdir<'v>(
        #[starlark(this)] this: Value<'v>,
        dir: &str,
        body: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<NoneType> {
        let ctx = run_ctx(this)?;
        ctx.push_frame();
        let result = eval.eval_function(body, &[], &[]);
        let statements = ctx.pop_frame();
        result.map_err(|e| anyhow::anyhow!("{e}"))?;
        ctx.record(Statement::ChangeDir {
            dir: dir.to_string(),
            body: statements,
        });
        Ok(NoneType)
    }

    fn mkdir<'v>(#[starlark(this)] this: Value<'v>, dir: &str) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::MakeDir {
            dir: dir.to_string(),
        });
        Ok(NoneType)
    }

    /// Move the build root to `dir`
    fn set_root<'v>(#[starlark(this)] this: Value<'v>, dir: &str) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::SetRoot {
            dir: dir.to_string(),
        });
        Ok(NoneType)
    }

    fn download<'v>(
        #[starlark(this)] this: Value<'v>,
        url: &str,
        path: &str,
        #[starlark(require = named)] sum: Option<Value<'v>>,
    ) -> anyhow::Result<NoneType> {
        let sum = sum.map(sum_from_value).transpose()?;
        run_ctx(this)?.record(Statement::Download {
            url: url.to_string(),
            path: path.to_string(),
            sum,
        });
        Ok(NoneType)
    }

    fn unpack<'v>(
        #[starlark(this)] this: Value<'v>,
        path: &str,
        #[starlark(require = named)] output: Option<&str>,
    ) -> anyhow::Result<NoneType> {
        run_ctx(this)?.record(Statement::Unpack {
            path: path.to_string(),
            output: output.map(str::to_string),
        });
        Ok(NoneType)
    }
}

/// Invoke an install or hook procedure and collect what it recorded
///
/// # Errors
///
/// Returns an error if the procedure fails.
pub(crate) fn record<'v>(
    eval: &mut Evaluator<'v, '_, '_>,
    procedure: Value<'v>,
) -> anyhow::Result<Vec<Statement>> {
    let ctx = RunCtx::placeholders();
    let frames = ctx.clone();
    let value = eval.heap().alloc(ctx);
    eval.eval_function(procedure, &[value], &[])
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(frames.take())
}

fn host_path<'a>(path: Option<&'a str>, darwin: Option<&'a str>, linux: Option<&'a str>) -> Option<&'a str> {
    path.or(match std::env::consts::OS {
        "macos" => darwin,
        "linux" => linux,
        _ => None,
    })
}

fn input_spec(value: Value<'_>) -> anyhow::Result<InputSpec> {
    value
        .downcast_ref::<InputValue>()
        .map(|v| v.spec.clone())
        .ok_or_else(|| anyhow::anyhow!("unsupported input type: {}", value.get_type()))
}

/// Extract the `(name, input)` pairs from a `source`/`input` value
pub(crate) fn input_entries(value: Value<'_>) -> anyhow::Result<Vec<(String, InputSpec)>> {
    if let Some(single) = value.downcast_ref::<InputValue>() {
        return Ok(vec![(
            crate::signature::DEFAULT_INPUT.to_string(),
            single.spec.clone(),
        )]);
    }
    if let Some(set) = value.downcast_ref::<InputSetValue>() {
        return Ok(set.entries.clone());
    }
    if let Some(dict) = DictRef::from_value(value) {
        return dict
            .iter()
            .map(|(k, v)| {
                let key = k
                    .unpack_str()
                    .ok_or_else(|| anyhow::anyhow!("input names must be strings"))?;
                Ok((key.to_string(), input_spec(v)?))
            })
            .collect();
    }
    anyhow::bail!("unsupported input type: {}", value.get_type())
}

/// Split a `dependencies` list into packages and instances
pub(crate) fn dependency_entries(
    value: Value<'_>,
) -> anyhow::Result<(Vec<Arc<ScriptPackage>>, Vec<Arc<ScriptPackage>>)> {
    let list = ListRef::from_value(value)
        .ok_or_else(|| anyhow::anyhow!("dependencies must be a list"))?;

    let mut packages = Vec::new();
    let mut instances = Vec::new();
    for item in list.iter() {
        let pkg = item.downcast_ref::<PackageValue>().ok_or_else(|| {
            anyhow::anyhow!(
                "dependencies must be loaded packages, got {}",
                item.get_type()
            )
        })?;
        if pkg.instance {
            instances.push(Arc::clone(&pkg.package));
        } else {
            packages.push(Arc::clone(&pkg.package));
        }
    }
    Ok((packages, instances))
}

/// Global functions available to recipes
#[starlark_module]
pub fn recipe_globals(builder: &mut GlobalsBuilder) {
    /// Declare the package this recipe builds
    fn pkg<'v>(
        #[starlark(require = named)] name: &str,
        #[starlark(require = named)] version: Option<&str>,
        #[starlark(require = named)] source: Option<Value<'v>>,
        #[starlark(require = named)] input: Option<Value<'v>>,
        #[starlark(require = named)] dependencies: Option<Value<'v>>,
        #[starlark(require = named)] install: Option<Value<'v>>,
        #[starlark(require = named)] hook: Option<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        if name.trim().is_empty() {
            anyhow::bail!("pkg() needs a non-empty name");
        }
        if source.is_some() && input.is_some() {
            anyhow::bail!("pkg() takes either source or input, not both");
        }

        Ok(heap.alloc(Prototype {
            name: name.to_string(),
            version: version.map(str::to_string),
            input: input.or(source),
            dependencies,
            install,
            hook,
        }))
    }

    /// A file input: a URL or a `./` path next to the recipe
    fn file<'v>(
        path: Option<&str>,
        #[starlark(require = named)] darwin: Option<&str>,
        #[starlark(require = named)] linux: Option<&str>,
        #[starlark(require = named)] sum: Option<Value<'v>>,
        #[starlark(require = named)] into: Option<&str>,
        #[starlark(require = named)] chdir: Option<bool>,
    ) -> anyhow::Result<InputValue> {
        Ok(InputValue {
            spec: InputSpec {
                path: host_path(path, darwin, linux).map(str::to_string),
                dir: None,
                sum: sum.map(sum_from_value).transpose()?,
                into: into.map(str::to_string),
                chdir: chdir.unwrap_or(false),
                linked: false,
            },
        })
    }

    /// A local directory input, relative to the recipe
    fn dir(
        path: Option<&str>,
        #[starlark(require = named)] linked: Option<bool>,
        #[starlark(require = named)] chdir: Option<bool>,
    ) -> anyhow::Result<InputValue> {
        Ok(InputValue {
            spec: InputSpec {
                path: None,
                dir: Some(path.unwrap_or(".").to_string()),
                sum: None,
                into: None,
                chdir: chdir.unwrap_or(false),
                linked: linked.unwrap_or(false),
            },
        })
    }

    /// Group named inputs
    fn inputs<'v>(#[starlark(kwargs)] kwargs: DictRef<'v>) -> anyhow::Result<InputSetValue> {
        let mut entries = Vec::new();
        for (k, v) in kwargs.iter() {
            let key = k
                .unpack_str()
                .ok_or_else(|| anyhow::anyhow!("input names must be strings"))?;
            entries.push((key.to_string(), input_spec(v)?));
        }
        Ok(InputSetValue { entries })
    }

    /// A synthetic package built only from an install procedure
    fn instance<'v>(
        #[starlark(require = named)] name: &str,
        #[starlark(require = named)] version: Option<&str>,
        #[starlark(require = named)] install: Value<'v>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<PackageValue> {
        let statements = record(eval, install)?;
        validate(&statements)?;
        let hash = code_hash(&statements)?;
        let version = version.unwrap_or_default();

        let id: PackageId = SignatureInput {
            name,
            version,
            install: Some(hash),
            ..SignatureInput::default()
        }
        .calculate();

        let package = ScriptPackage {
            name: name.to_string(),
            version: id.version().to_string(),
            id,
            repo: String::new(),
            inputs: Vec::new(),
            dependencies: Vec::new(),
            instances: Vec::new(),
            install: Some(statements),
            hook: None,
            constraints: host_constraints(),
        };

        Ok(PackageValue {
            package: Arc::new(package),
            instance: true,
        })
    }
}
