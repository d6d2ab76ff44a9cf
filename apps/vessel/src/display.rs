//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::{Style, Term};
use std::io;
use vessel_ops::{
    BuildOutcome, CalcReport, KeyReport, LinkReport, OperationResult, ShellEnv, SumsReport,
};
use vessel_types::{ColorChoice, GcReport, InstallReport, PackReport, PackageId, UploadReport};

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    colors: bool,
}

impl OutputRenderer {
    pub fn new(json_output: bool, color_choice: ColorChoice) -> Self {
        Self {
            json_output,
            colors: colors_enabled(color_choice),
        }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            let json = result.to_json().map_err(io::Error::other)?;
            println!("{json}");
            return Ok(());
        }

        match result {
            OperationResult::InstallReport(report) => self.render_install_report(report),
            OperationResult::Build(outcome) => self.render_build(outcome),
            OperationResult::Calc(report) => self.render_calc(report),
            OperationResult::Pack(report) => self.render_pack(report),
            OperationResult::Upload(report) => self.render_upload(report),
            OperationResult::Shell(env) => self.render_shell_env(env),
            OperationResult::Gc(report) => self.render_gc(report),
            OperationResult::Link(report) => self.render_link(report),
            OperationResult::PackageList(ids) => self.render_package_list(ids),
            OperationResult::Sums(report) => self.render_sums(report),
            OperationResult::Key(report) => self.render_key(report),
            OperationResult::Success(message) => {
                println!("{message}");
                Ok(())
            }
        }
    }

    /// `failed: <id>: <message>` for every failed id, on stderr
    pub fn render_failures(&self, failures: &[(PackageId, String)]) {
        let style = self.style(Style::new().red());
        for (id, message) in failures {
            eprintln!("{}: {id}: {message}", style.apply_to("failed"));
        }
    }

    fn style(&self, style: Style) -> Style {
        style.force_styling(self.colors)
    }

    fn render_install_report(&self, report: &InstallReport) -> io::Result<()> {
        let bold = self.style(Style::new().bold());
        if report.built.is_empty() && report.from_car.is_empty() {
            println!("Nothing to install.");
        } else {
            println!("{}", bold.apply_to("Install summary"));
            for id in &report.built {
                println!("  built     {id}");
            }
            for id in &report.from_car {
                println!("  from car  {id}");
            }
        }
        if !report.skipped.is_empty() {
            println!("Skipped ({}):", report.skipped.len());
            for id in &report.skipped {
                println!("  {id}");
            }
        }
        println!(
            "{} installed, {} already present, {} failed in {}ms",
            report.built.len() + report.from_car.len(),
            report.already_installed.len(),
            report.failed.len(),
            report.duration_ms
        );
        Ok(())
    }

    fn render_build(&self, outcome: &BuildOutcome) -> io::Result<()> {
        self.render_install_report(&outcome.report)?;
        println!("{}", outcome.id);
        Ok(())
    }

    fn render_calc(&self, report: &CalcReport) -> io::Result<()> {
        println!("{}", self.style(Style::new().bold()).apply_to(&report.id));
        if report.install_order.is_empty() {
            println!("Already installed.");
            return Ok(());
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new("Installer").add_attribute(Attribute::Bold),
            Cell::new("Waits for").add_attribute(Attribute::Bold),
        ]);
        for (n, planned) in report.install_order.iter().enumerate() {
            let installer = Cell::new(&planned.installer);
            let installer = if self.colors && planned.installer == "car" {
                installer.fg(Color::Green)
            } else {
                installer
            };
            table.add_row(vec![
                Cell::new(n + 1),
                Cell::new(&planned.id),
                installer,
                Cell::new(planned.dependencies.len()),
            ]);
        }
        println!("{table}");
        if !report.installed.is_empty() {
            println!("{} dependencies already in the store", report.installed.len());
        }
        Ok(())
    }

    fn render_pack(&self, report: &PackReport) -> io::Result<()> {
        println!("Packed {} ({} bytes)", report.id, report.size);
        println!("  car:  {}", report.car_path.display());
        println!("  info: {}", report.info_path.display());
        if !report.dependencies.is_empty() {
            println!("  car dependencies:");
            for dep in &report.dependencies {
                println!("    {dep}");
            }
        }
        Ok(())
    }

    fn render_upload(&self, report: &UploadReport) -> io::Result<()> {
        if report.uploaded.is_empty() {
            println!("Nothing uploaded to {}.", report.base);
        }
        for car in &report.uploaded {
            println!("# {} => {}", car.url, car.etag.as_deref().unwrap_or("-"));
        }
        Ok(())
    }

    fn render_shell_env(&self, env: &ShellEnv) -> io::Result<()> {
        Term::stdout().write_line(&format!("PATH={}", env.path))
    }

    fn render_gc(&self, report: &GcReport) -> io::Result<()> {
        for id in &report.removed {
            println!("removed {id}");
        }
        println!(
            "{} entries removed, {} bytes recovered",
            report.entries_removed, report.bytes_recovered
        );
        Ok(())
    }

    fn render_link(&self, report: &LinkReport) -> io::Result<()> {
        println!("{} links for {} in profile {}", report.links, report.id, report.profile);
        Ok(())
    }

    fn render_package_list(&self, ids: &[PackageId]) -> io::Result<()> {
        if ids.is_empty() {
            println!("No packages linked.");
            return Ok(());
        }
        let term = Term::stdout();
        for id in ids {
            term.write_line(id.as_str())?;
        }
        Ok(())
    }

    fn render_sums(&self, report: &SumsReport) -> io::Result<()> {
        if report.recorded.is_empty() {
            println!("All inputs already have sums.");
            return Ok(());
        }
        for (path, sum) in &report.recorded {
            println!("{path}: {sum}");
        }
        println!("{} sums in {}", report.total, report.file.display());
        Ok(())
    }

    fn render_key(&self, report: &KeyReport) -> io::Result<()> {
        if report.generated {
            println!("Generated signing key {}", report.path.display());
        } else {
            println!("Keeping existing signing key {}", report.path.display());
        }
        println!("signer: {}", report.signer);
        Ok(())
    }
}

pub fn colors_enabled(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => Term::stdout().features().colors_supported(),
    }
}
