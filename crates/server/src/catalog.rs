//! Fan control command catalog.
//!
//! QNAP models disagree on where the fan lives: some expose a sysfs PWM
//! file, older firmware ships `qcontrol`, some only have `/proc/qnap`, and
//! QM2 expansion cards are driven through `hal_app` with their enclosure id.
//! Every logical operation therefore maps to an ordered list of candidate
//! commands. The session manager tries them in order and accepts the first
//! one that succeeds.

use std::fmt;
use std::str::FromStr;

use nasfan_protocol::FanOption;

use crate::error::{CatalogError, ShellError};
use crate::ssh::ShellOutput;

/// Placeholder replaced by the detected QM2 `enc_sys_id`
const ENC_SYS_ID: &str = "{enc_sys_id}";

const SYSFS_PWM: &str = "/sys/devices/platform/pwm_fan/hwmon/hwmon0/pwm1";
const PROC_FAN: &str = "/proc/qnap/fan_speed";

/// Sanity check issued right after authentication
pub const CONNECTION_TEST_COMMAND: &str = "echo 'Connection test'";

/// Lists enclosures; QM2 cards show up with their `enc_sys_id`
pub const ENCLOSURE_PROBE_COMMAND: &str = "hal_app --se_enum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanLevel {
    Auto,
    Silent,
    Low,
    Medium,
    High,
    Max,
}

impl FanLevel {
    pub const ALL: [FanLevel; 6] = [
        FanLevel::Auto,
        FanLevel::Silent,
        FanLevel::Low,
        FanLevel::Medium,
        FanLevel::High,
        FanLevel::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FanLevel::Auto => "auto",
            FanLevel::Silent => "silent",
            FanLevel::Low => "low",
            FanLevel::Medium => "medium",
            FanLevel::High => "high",
            FanLevel::Max => "max",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FanLevel::Auto => "Auto",
            FanLevel::Silent => "Silent (15%)",
            FanLevel::Low => "Low (25%)",
            FanLevel::Medium => "Medium (50%)",
            FanLevel::High => "High (75%)",
            FanLevel::Max => "Maximum (100%)",
        }
    }

    /// Raw 0–255 duty cycle for manual levels; `None` hands control back to
    /// the firmware.
    pub fn pwm(&self) -> Option<u8> {
        match self {
            FanLevel::Auto => None,
            FanLevel::Silent => Some(38),
            FanLevel::Low => Some(64),
            FanLevel::Medium => Some(128),
            FanLevel::High => Some(191),
            FanLevel::Max => Some(255),
        }
    }

    /// Argument understood by `qcontrol fan` and `/proc/qnap/fan_speed`
    fn vendor_step(&self) -> &'static str {
        match self {
            FanLevel::Auto => "auto",
            FanLevel::Silent => "silent",
            FanLevel::Low => "1",
            FanLevel::Medium => "2",
            FanLevel::High => "3",
            FanLevel::Max => "4",
        }
    }

    /// Value written to the sysfs PWM file. Silent has no legacy step.
    fn sysfs_step(&self) -> Option<u8> {
        match self {
            FanLevel::Auto => Some(0),
            FanLevel::Silent => None,
            FanLevel::Low => Some(1),
            FanLevel::Medium => Some(2),
            FanLevel::High => Some(3),
            FanLevel::Max => Some(4),
        }
    }

    /// Reverse of the step values the speed commands write.
    fn from_step(token: &str) -> Option<FanLevel> {
        let token = token.to_ascii_lowercase();
        FanLevel::ALL.into_iter().find(|level| {
            level.vendor_step() == token
                || level.sysfs_step().is_some_and(|step| step.to_string() == token)
        })
    }
}

impl fmt::Display for FanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanLevel {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FanLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownLevel(s.to_string()))
    }
}

/// A catalog entry: either a plain command or one that addresses a QM2
/// card and is only usable once the card's enclosure id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateCommand {
    Generic(String),
    Enclosure(String),
}

impl CandidateCommand {
    pub fn generic(command: impl Into<String>) -> Self {
        CandidateCommand::Generic(command.into())
    }

    pub fn enclosure(template: impl Into<String>) -> Self {
        CandidateCommand::Enclosure(template.into())
    }

    /// The concrete command line, or `None` when it needs a card that was
    /// not detected.
    pub fn render(&self, enc_sys_id: Option<&str>) -> Option<String> {
        match self {
            CandidateCommand::Generic(command) => Some(command.clone()),
            CandidateCommand::Enclosure(template) => {
                enc_sys_id.map(|id| template.replace(ENC_SYS_ID, id))
            }
        }
    }
}

/// Unit a status command reports the fan setting in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingScale {
    /// Raw 0–255 duty cycle, as `hal_app` reports for a QM2 card
    Pwm,
    /// The vendor step (`auto`, `silent`, `0`–`4`) the speed commands write
    Step,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCandidate {
    pub command: CandidateCommand,
    pub scale: ReadingScale,
}

impl StatusCandidate {
    pub fn new(command: CandidateCommand, scale: ReadingScale) -> Self {
        Self { command, scale }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanSpeedOption {
    pub level: FanLevel,
    pub candidates: Vec<CandidateCommand>,
}

impl FanSpeedOption {
    pub fn label(&self) -> &'static str {
        self.level.label()
    }
}

/// Immutable table of candidate commands per logical operation
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    status: Vec<StatusCandidate>,
    options: Vec<FanSpeedOption>,
}

impl CommandCatalog {
    pub fn new(status: Vec<StatusCandidate>, options: Vec<FanSpeedOption>) -> Self {
        Self { status, options }
    }

    /// The QNAP command table. With a QM2 card present its candidates are
    /// tried before the chassis paths.
    pub fn builtin() -> Self {
        // The chassis paths read back the step the speed commands wrote.
        let status = vec![
            StatusCandidate::new(
                CandidateCommand::enclosure(format!(
                    "hal_app --se_sys_get_fan_pwm enc_sys_id={ENC_SYS_ID},obj_index=0"
                )),
                ReadingScale::Pwm,
            ),
            StatusCandidate::new(
                CandidateCommand::generic(format!("cat {SYSFS_PWM}")),
                ReadingScale::Step,
            ),
            StatusCandidate::new(
                CandidateCommand::generic("qcontrol fan status"),
                ReadingScale::Step,
            ),
            StatusCandidate::new(
                CandidateCommand::generic(format!("cat {PROC_FAN}")),
                ReadingScale::Step,
            ),
        ];

        let options = FanLevel::ALL
            .into_iter()
            .map(|level| FanSpeedOption {
                level,
                candidates: builtin_speed_candidates(level),
            })
            .collect();

        Self::new(status, options)
    }

    pub fn fan_options(&self) -> Vec<FanOption> {
        self.options
            .iter()
            .map(|option| FanOption {
                value: option.level.as_str().to_string(),
                label: option.label().to_string(),
            })
            .collect()
    }

    pub fn lookup(&self, level: &str) -> Result<&FanSpeedOption, CatalogError> {
        let parsed: FanLevel = level.parse()?;
        self.options
            .iter()
            .find(|option| option.level == parsed)
            .ok_or_else(|| CatalogError::UnknownLevel(level.to_string()))
    }

    /// Rendered status commands, each with the scale its output is in
    pub fn status_candidates(&self, enc_sys_id: Option<&str>) -> Vec<(String, ReadingScale)> {
        self.status
            .iter()
            .filter_map(|c| c.command.render(enc_sys_id).map(|command| (command, c.scale)))
            .collect()
    }

    pub fn speed_candidates(
        &self,
        level: &str,
        enc_sys_id: Option<&str>,
    ) -> Result<(FanLevel, Vec<String>), CatalogError> {
        let option = self.lookup(level)?;
        Ok((option.level, render_all(&option.candidates, enc_sys_id)))
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn render_all(candidates: &[CandidateCommand], enc_sys_id: Option<&str>) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|c| c.render(enc_sys_id))
        .collect()
}

fn builtin_speed_candidates(level: FanLevel) -> Vec<CandidateCommand> {
    let mut candidates = Vec::new();

    // QM2 card: mode 0 is firmware-controlled, mode 1 is manual PWM.
    let card = match level.pwm() {
        None => format!("hal_app --se_sys_set_fan_mode enc_sys_id={ENC_SYS_ID},obj_index=0,mode=0"),
        Some(pwm) => format!(
            "hal_app --se_sys_set_fan_mode enc_sys_id={ENC_SYS_ID},obj_index=0,mode=1 && \
             hal_app --se_sys_set_fan_pwm enc_sys_id={ENC_SYS_ID},obj_index=0,pwm={pwm}"
        ),
    };
    candidates.push(CandidateCommand::enclosure(card));

    if let Some(step) = level.sysfs_step() {
        candidates.push(CandidateCommand::generic(format!("echo {step} > {SYSFS_PWM}")));
    }

    let step = level.vendor_step();
    candidates.push(CandidateCommand::generic(format!("qcontrol fan {step}")));
    candidates.push(CandidateCommand::generic(format!("/usr/bin/qcontrol fan {step}")));
    candidates.push(CandidateCommand::generic(format!("echo {step} > {PROC_FAN}")));

    candidates
}

/// Find the QM2 card's `enc_sys_id` in `hal_app --se_enum` output. The id
/// is the third column of the first line naming a QM2 card.
pub fn parse_enc_sys_id(enum_output: &str) -> Option<String> {
    enum_output
        .lines()
        .filter(|line| line.contains("QM2"))
        .find_map(|line| line.split_whitespace().nth(2).map(str::to_string))
}

/// What one candidate attempt amounted to
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The command succeeded; iteration stops here
    Accepted { stdout: String },
    /// The command ran (or timed out) without success; try the next one.
    /// `cause` keeps the timeout error when there was one.
    Rejected {
        response: String,
        error: String,
        cause: Option<ShellError>,
    },
    /// The transport is gone; the connection must be dropped
    Fatal(ShellError),
}

impl AttemptOutcome {
    pub fn from_result(result: Result<ShellOutput, ShellError>) -> Self {
        match result {
            Ok(output) if output.succeeded() => AttemptOutcome::Accepted {
                stdout: output.stdout,
            },
            Ok(output) => AttemptOutcome::Rejected {
                error: output.failure_reason(),
                response: output.stderr,
                cause: None,
            },
            Err(e) if e.is_fatal() => AttemptOutcome::Fatal(e),
            Err(e) => AttemptOutcome::Rejected {
                response: String::new(),
                error: e.to_string(),
                cause: Some(e),
            },
        }
    }
}

/// A status reading interpreted on its command's scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanReading {
    Pwm(u8),
    Level(FanLevel),
}

/// Parsed result of a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanStatus {
    /// The candidate that answered
    pub command: String,
    pub raw: String,
    pub reading: Option<FanReading>,
}

impl FanStatus {
    pub fn parse(command: impl Into<String>, scale: ReadingScale, stdout: &str) -> Self {
        let raw = stdout.trim().to_string();
        let token = raw
            .split(|c: char| c.is_whitespace() || c == '=' || c == ':')
            .filter(|token| !token.is_empty())
            .last();
        let reading = token.and_then(|token| match scale {
            ReadingScale::Pwm => token.parse::<u8>().ok().map(FanReading::Pwm),
            ReadingScale::Step => FanLevel::from_step(token).map(FanReading::Level),
        });
        Self {
            command: command.into(),
            raw,
            reading,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        match self.reading {
            Some(FanReading::Pwm(pwm)) => Some(((pwm as u32 * 100 + 127) / 255) as u8),
            _ => None,
        }
    }
}

impl fmt::Display for FanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reading {
            Some(FanReading::Pwm(pwm)) => {
                let percent = self.percent().unwrap_or_default();
                write!(f, "PWM: {pwm} ({percent}%)")
            }
            Some(FanReading::Level(level)) => write!(f, "Fan Level: {}", level.label()),
            None if self.raw.is_empty() => f.write_str("Fan Status: (no output)"),
            None => write!(f, "Fan Status: {}", self.raw),
        }
    }
}
