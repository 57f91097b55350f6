//! The `weft` command line.
//!
//! A thin driver around the library: compile a demo pipeline and print
//! its lowered loop nest and argument signature.

use weft_target::Target;
use weftc::demo::{blur, BlurSchedule};

fn usage() -> ! {
    eprintln!(
        "usage: weft demo blur [--schedule tiled|inline|breadth] [--target TARGET]\n\
         \n\
         Compiles the demo pipeline and prints the lowered loop nest.\n\
         TARGET is an `arch-bits-os[-feature]*` descriptor; the default\n\
         comes from WEFT_TARGET or the host."
    );
    std::process::exit(2);
}

fn main() {
    weftc::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut schedule = BlurSchedule::Tiled;
    let mut target_str: Option<String> = None;

    let mut it = args.iter();
    match (it.next().map(String::as_str), it.next().map(String::as_str)) {
        (Some("demo"), Some("blur")) => {}
        _ => usage(),
    }
    while let Some(flag) = it.next() {
        match (flag.as_str(), it.next()) {
            ("--schedule", Some(v)) => {
                schedule = match v.as_str() {
                    "tiled" => BlurSchedule::Tiled,
                    "inline" => BlurSchedule::Inline,
                    "breadth" => BlurSchedule::Breadth,
                    other => {
                        eprintln!("unknown schedule `{other}`");
                        usage();
                    }
                };
            }
            ("--target", Some(v)) => target_str = Some(v.clone()),
            _ => usage(),
        }
    }

    let target = match target_str {
        Some(s) => Target::parse(&s),
        None => Target::from_environment(),
    };
    let target = match target {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let pipeline = match blur(schedule, 64, 32) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    match pipeline.compile(&target) {
        Ok(module) => {
            println!("// target: {}", module.target);
            println!("// arguments:");
            for a in &module.arguments {
                let kind = if a.is_buffer { "buffer" } else { "scalar" };
                println!("//   {} {} ({})", kind, a.name, a.ty);
            }
            print!("{}", module.stmt);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
