use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use qsol::{
    build_for_target, check_target_support, compile_frontend, compile_with_scenario,
    load_scenario_payload, render_diagnostics, run_for_target, support_report_to_json,
    write_capability_report, write_run_result, CompileOptions, PluginRegistry, QsolError,
    SourceText,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(QsolError::Diagnostics) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), QsolError> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_help();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "-h" | "--help" => {
            print_help();
            Ok(())
        }
        "parse" | "check" => cmd_check(&rest),
        "lower" => cmd_lower(&rest),
        "ground" => cmd_ground(&rest),
        "targets" => cmd_targets(),
        "support" => cmd_support(&rest),
        "build" => cmd_build(&rest),
        "run" => cmd_run(&rest),
        other => {
            eprintln!("unknown command `{other}`");
            print_help();
            Err(QsolError::Diagnostics)
        }
    }
}

fn print_help() {
    println!("QSOL compiler and targeting pipeline");
    println!();
    println!("Usage: qsol <command> [options]");
    println!();
    println!("Commands:");
    println!("  check <file>                      Parse and semantically check a model");
    println!("  lower <file>                      Print the symbolic kernel IR as JSON");
    println!("  ground <file> -s <scenario.json>  Ground the model against a scenario");
    println!("  targets                           List available runtimes and backends");
    println!("  support <file> -s <scenario.json> -u <runtime> [-b <backend>]");
    println!("  build <file> -s <scenario.json> -u <runtime> -o <outdir> [--format qubo|ising]");
    println!("  run <file> -s <scenario.json> -u <runtime> [-o <outdir>] [--option k=v ...]");
}

struct CommonArgs {
    file: PathBuf,
    scenario: Option<PathBuf>,
    runtime: Option<String>,
    backend: Option<String>,
    outdir: Option<PathBuf>,
    output_format: String,
    runtime_options: Vec<(String, serde_json::Value)>,
}

fn parse_common(rest: &[String]) -> Result<CommonArgs, QsolError> {
    let mut file = None;
    let mut scenario = None;
    let mut runtime = None;
    let mut backend = None;
    let mut outdir = None;
    let mut output_format = "qubo".to_string();
    let mut runtime_options = Vec::new();

    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-s" | "--scenario" => scenario = iter.next().map(PathBuf::from),
            "-u" | "--runtime" => runtime = iter.next().cloned(),
            "-b" | "--backend" => backend = iter.next().cloned(),
            "-o" | "--out" => outdir = iter.next().map(PathBuf::from),
            "--format" => {
                if let Some(value) = iter.next() {
                    output_format = value.clone();
                }
            }
            "--option" => {
                if let Some(pair) = iter.next() {
                    let Some((key, raw)) = pair.split_once('=') else {
                        return Err(QsolError::Usage(format!(
                            "runtime option `{pair}` must use key=value form"
                        )));
                    };
                    let value = serde_json::from_str(raw)
                        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
                    runtime_options.push((key.to_string(), value));
                }
            }
            other if file.is_none() && !other.starts_with('-') => {
                file = Some(PathBuf::from(other));
            }
            other => {
                return Err(QsolError::Usage(format!("unexpected argument `{other}`")));
            }
        }
    }

    let Some(file) = file else {
        return Err(QsolError::Usage("missing model file argument".to_string()));
    };
    Ok(CommonArgs {
        file,
        scenario,
        runtime,
        backend,
        outdir,
        output_format,
        runtime_options,
    })
}

fn compile_options(args: &CommonArgs) -> Result<CompileOptions, QsolError> {
    let mut options = CompileOptions {
        filename: args.file.display().to_string(),
        output_format: args.output_format.clone(),
        outdir: args.outdir.clone(),
        module_root: args.file.parent().map(PathBuf::from),
        ..CompileOptions::default()
    };
    if let Some(path) = &args.scenario {
        options.scenario = Some(load_scenario_payload(path)?);
    }
    options.selection.cli_runtime = args.runtime.clone();
    options.selection.cli_backend = args.backend.clone();
    for (key, value) in &args.runtime_options {
        options.runtime_options.insert(key.clone(), value.clone());
    }
    if let Some(outdir) = &args.outdir {
        let _ = qsol::logging::init_file_logger(&outdir.join("qsol.log"), log::Level::Debug);
    }
    Ok(options)
}

fn report_unit(source: &SourceText, unit: &qsol::CompilationUnit) -> Result<(), QsolError> {
    if !unit.diagnostics.is_empty() {
        eprintln!("{}", render_diagnostics(Some(source), &unit.diagnostics));
    }
    if unit.has_errors() {
        return Err(QsolError::Diagnostics);
    }
    Ok(())
}

fn cmd_check(rest: &[String]) -> Result<(), QsolError> {
    let args = parse_common(rest)?;
    let options = compile_options(&args)?;
    let text = fs::read_to_string(&args.file)?;
    let source = SourceText::new(text.clone(), options.filename.clone());
    let unit = compile_frontend(&text, &options);
    report_unit(&source, &unit)?;
    println!("ok");
    Ok(())
}

fn cmd_lower(rest: &[String]) -> Result<(), QsolError> {
    let args = parse_common(rest)?;
    let options = compile_options(&args)?;
    let text = fs::read_to_string(&args.file)?;
    let source = SourceText::new(text.clone(), options.filename.clone());
    let unit = compile_frontend(&text, &options);
    report_unit(&source, &unit)?;
    if let Some(kernel) = &unit.kernel {
        println!("{}", serde_json::to_string_pretty(kernel)?);
    }
    Ok(())
}

fn cmd_ground(rest: &[String]) -> Result<(), QsolError> {
    let args = parse_common(rest)?;
    let options = compile_options(&args)?;
    let text = fs::read_to_string(&args.file)?;
    let source = SourceText::new(text.clone(), options.filename.clone());
    let unit = compile_with_scenario(&text, &options);
    report_unit(&source, &unit)?;
    if let Some(ground) = &unit.ground {
        println!("{}", serde_json::to_string_pretty(ground)?);
    }
    Ok(())
}

fn cmd_targets() -> Result<(), QsolError> {
    let registry = PluginRegistry::from_discovery(Vec::new())
        .map_err(|issue| QsolError::Plugin(issue.message))?;
    println!("runtimes:");
    for runtime in registry.list_runtimes() {
        println!(
            "  {} ({}) -> backends: {}",
            runtime.plugin_id(),
            runtime.display_name(),
            runtime.compatible_backend_ids().join(", ")
        );
    }
    println!("backends:");
    for backend in registry.list_backends() {
        println!("  {} ({})", backend.plugin_id(), backend.display_name());
    }
    Ok(())
}

fn cmd_support(rest: &[String]) -> Result<(), QsolError> {
    let args = parse_common(rest)?;
    let options = compile_options(&args)?;
    let registry = PluginRegistry::from_discovery(Vec::new())
        .map_err(|issue| QsolError::Plugin(issue.message))?;
    let text = fs::read_to_string(&args.file)?;
    let source = SourceText::new(text.clone(), options.filename.clone());
    let unit = check_target_support(&text, &options, &registry);
    if let Some(report) = &unit.support_report {
        let payload = support_report_to_json(report);
        if let Some(outdir) = &options.outdir {
            write_capability_report(outdir, &payload)?;
        }
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    report_unit(&source, &unit)
}

fn cmd_build(rest: &[String]) -> Result<(), QsolError> {
    let args = parse_common(rest)?;
    let options = compile_options(&args)?;
    let registry = PluginRegistry::from_discovery(Vec::new())
        .map_err(|issue| QsolError::Plugin(issue.message))?;
    let text = fs::read_to_string(&args.file)?;
    let source = SourceText::new(text.clone(), options.filename.clone());
    let unit = build_for_target(&text, &options, &registry);
    if let (Some(report), Some(outdir)) = (&unit.support_report, &options.outdir) {
        write_capability_report(outdir, &support_report_to_json(report))?;
    }
    report_unit(&source, &unit)?;
    println!("ok");
    Ok(())
}

fn cmd_run(rest: &[String]) -> Result<(), QsolError> {
    let args = parse_common(rest)?;
    let options = compile_options(&args)?;
    let registry = PluginRegistry::from_discovery(Vec::new())
        .map_err(|issue| QsolError::Plugin(issue.message))?;
    let text = fs::read_to_string(&args.file)?;
    let source = SourceText::new(text.clone(), options.filename.clone());
    let unit = run_for_target(&text, &options, &registry);

    let mut report_path = String::new();
    if let (Some(report), Some(outdir)) = (&unit.support_report, &options.outdir) {
        let path = write_capability_report(outdir, &support_report_to_json(report))?;
        report_path = path.display().to_string();
    }
    if let Some(result) = &unit.run_result {
        let mut result = result.clone();
        result.capability_report_path = report_path;
        if let Some(outdir) = &options.outdir {
            write_run_result(outdir, &result)?;
        }
        println!("{}", serde_json::to_string_pretty(&result)?);
        report_unit(&source, &unit)?;
        if result.status != "ok" {
            return Err(QsolError::Diagnostics);
        }
        return Ok(());
    }
    report_unit(&source, &unit)?;
    Err(QsolError::Diagnostics)
}
