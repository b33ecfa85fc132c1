// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Driver log sink behind the `log` facade.
//!
//! `NVD_LOG=1` logs to stdout, any other value appends to that path, unset
//! disables logging entirely. The line format is
//! `<sec>.<nsec> [<pid>-<tid>] <file>:<line> <target> <message>` on the
//! monotonic clock, one flushed line per record, so interleaved output from
//! several client threads stays attributable.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use std::sync::OnceLock;

use nix::sys::time::TimeSpec;
use nix::time::clock_gettime;
use nix::time::ClockId;

enum Sink {
    Stdout,
    File(Mutex<File>),
}

struct DriverLogger {
    sink: Sink,
}

impl log::Log for DriverLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let now =
            clock_gettime(ClockId::CLOCK_MONOTONIC).unwrap_or_else(|_| TimeSpec::new(0, 0));
        let line = format!(
            "{:10}.{:09} [{}-{}] {}:{:4} {:24} {}\n",
            now.tv_sec(),
            now.tv_nsec(),
            std::process::id(),
            nix::unistd::gettid(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            record.target(),
            record.args()
        );
        match &self.sink {
            Sink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(line.as_bytes());
                let _ = out.flush();
            }
            Sink::File(f) => {
                let mut f = f.lock().unwrap();
                let _ = f.write_all(line.as_bytes());
                let _ = f.flush();
            }
        }
    }

    fn flush(&self) {}
}

/// Installs the sink according to `NVD_LOG`. Safe to call more than once;
/// only the first call wins, later driver instances reuse it.
pub fn init_from_env() {
    static LOGGER: OnceLock<Option<DriverLogger>> = OnceLock::new();
    let logger = LOGGER.get_or_init(|| {
        let value = std::env::var("NVD_LOG").ok()?;
        let sink = if value == "1" {
            Sink::Stdout
        } else {
            match OpenOptions::new().create(true).append(true).open(&value) {
                Ok(f) => Sink::File(Mutex::new(f)),
                Err(_) => Sink::Stdout,
            }
        };
        Some(DriverLogger { sink })
    });
    if let Some(logger) = logger {
        if log::set_logger(logger).is_ok() {
            log::set_max_level(log::LevelFilter::Debug);
        }
    }
}
