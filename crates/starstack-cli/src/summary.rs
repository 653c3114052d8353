use std::path::Path;

use console::Style;
use starstack_core::pipeline::{
    LiveStackConfig, PostProcessConfig, RejectionMode, SessionMetrics, StackReport,
};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_session_summary(config: &LiveStackConfig, output: &Path, num_subs: usize) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Live Stack"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Subs"),
        s.value.apply_to(num_subs)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Downscale"),
        s.value.apply_to(config.downscale)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Chunk"),
        s.value.apply_to(format!("{} subs", config.chunk_size))
    );
    println!();

    // Alignment
    println!("  {}", s.header.apply_to("Alignment"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(config.alignment.method)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Kernel"),
        s.value.apply_to(config.alignment.interpolation)
    );
    println!();

    // Stacking
    println!("  {}", s.header.apply_to("Stacking"));
    match config.rejection {
        RejectionMode::None => println!(
            "    {:<12}{}",
            s.label.apply_to("Rejection"),
            s.disabled.apply_to("none")
        ),
        RejectionMode::Sigma { low, high } => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Rejection"),
                s.method.apply_to("Sigma clip")
            );
            print_sigmas(&s, low, high);
        }
        RejectionMode::Winsorized { low, high, cutoff } => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Rejection"),
                s.method.apply_to("Winsorized sigma clip")
            );
            print_sigmas(&s, low, high);
            println!(
                "    {:<12}{}",
                s.label.apply_to("Cutoff"),
                s.value.apply_to(cutoff)
            );
        }
        RejectionMode::ImageMm(p) => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Rejection"),
                s.method.apply_to("ImageMM")
            );
            println!(
                "    {:<12}{} (kappa {}, alpha {})",
                s.label.apply_to("Iterations"),
                s.value.apply_to(p.iterations),
                p.kappa,
                p.alpha
            );
            println!(
                "    {:<12}{} subs",
                s.label.apply_to("History"),
                s.value.apply_to(p.history)
            );
        }
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Weighting"),
        s.method.apply_to(config.weighting)
    );
    println!();

    print_post_process_section(&s, &config.post_process);
}

fn print_sigmas(s: &Styles, low: f32, high: f32) {
    println!(
        "    {:<12}{}",
        s.label.apply_to("Low"),
        s.value.apply_to(format!("{low} \u{3c3}"))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("High"),
        s.value.apply_to(format!("{high} \u{3c3}"))
    );
}

pub fn print_post_process_summary(config: &PostProcessConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Post-processing"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    print_post_process_section(&s, config);
}

fn print_post_process_section(s: &Styles, config: &PostProcessConfig) {
    if config.is_noop() {
        println!(
            "  {:<14}{}",
            s.header.apply_to("Post-process"),
            s.disabled.apply_to("disabled")
        );
        println!();
        return;
    }

    println!("  {}", s.header.apply_to("Post-process"));
    let deconv = &config.deconvolution;
    if deconv.amount > 0.0 {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Deconvolve"),
            s.value.apply_to(format!("{:.0}%", deconv.amount * 100.0))
        );
        println!(
            "    {:<14}{}",
            s.label.apply_to("PSF"),
            s.method.apply_to(deconv.psf.method)
        );
    } else {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Deconvolve"),
            s.disabled.apply_to("disabled")
        );
    }

    if config.sharpen.amount > 0.0 {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Sharpen"),
            s.value.apply_to(format!(
                "{} (kernel {}, \u{3c3} {})",
                config.sharpen.amount, config.sharpen.kernel_size, config.sharpen.sigma
            ))
        );
    } else {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Sharpen"),
            s.disabled.apply_to("disabled")
        );
    }

    if config.denoise.strength > 0.0 {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Denoise"),
            s.value.apply_to(config.denoise.strength)
        );
    } else {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Denoise"),
            s.disabled.apply_to("disabled")
        );
    }
    println!();
}

pub fn print_stack_report(report: &StackReport, metrics: &SessionMetrics) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("State"),
        s.method.apply_to(report.state)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Stacked"),
        s.value.apply_to(format!("{} subs", report.total_subs))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Rejected"),
        s.value.apply_to(metrics.subs_failed)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Weight"),
        s.value.apply_to(format!("{:.2}", report.total_weight))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Stack SNR"),
        s.value.apply_to(format!("{:.2}", metrics.stack_snr))
    );
    if metrics.sub_snr.count > 0 {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Sub SNR"),
            s.value.apply_to(format!(
                "{:.2} (min {:.2}, max {:.2})",
                metrics.sub_snr.mean, metrics.sub_snr.min, metrics.sub_snr.max
            ))
        );
    }
}
