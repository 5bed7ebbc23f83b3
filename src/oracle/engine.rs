//! Subprocess-backed numerical engine.
//!
//! The engine is any program that reads one JSON request per line on stdin
//! and answers with one JSON reply per line on stdout:
//!
//! ```text
//! -> {"op":"phiid","micro":[[...],[...]],"time_lag":1,"redundancy":"mmi"}
//! <- {"status":"ok","atoms":{"rtr":0.1,...,"sts":0.02}}
//! -> {"op":"emergence","quantity":"psi","micro":[[...]],"macro":[[...]],"time_lag":1,"family":"gaussian"}
//! <- {"status":"ok","value":0.31}
//! <- {"status":"error","message":"covariance matrix is singular"}
//! ```
//!
//! Matrices travel row-major. A `null` value in an emergence reply reads as
//! NaN. The session is owned by whoever started it: calls are serialized
//! through a mutex, [`EngineSession::close`] ends it gracefully, and dropping
//! an open session kills the child.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    DistributionFamily, OracleError, PhiIdAtoms, PhiIdOracle, RedundancyFunc, ShannonOracle,
    ShannonQuantity,
};
use crate::bundle::matrix_rows;

/// How to launch the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum EngineRequest {
    Phiid {
        micro: Vec<Vec<f64>>,
        time_lag: usize,
        redundancy: RedundancyFunc,
    },
    Emergence {
        quantity: ShannonQuantity,
        micro: Vec<Vec<f64>>,
        #[serde(rename = "macro")]
        macro_series: Vec<Vec<f64>>,
        time_lag: usize,
        family: DistributionFamily,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum EngineReply {
    Ok {
        #[serde(default)]
        atoms: Option<PhiIdAtoms>,
        #[serde(default)]
        value: Option<f64>,
    },
    Error {
        message: String,
    },
}

struct EngineIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct EngineSession {
    program: String,
    io: Mutex<Option<EngineIo>>,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl EngineSession {
    pub fn start(config: &EngineConfig) -> Result<Self, OracleError> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| OracleError::Spawn {
            program: config.program.clone(),
            message: e.to_string(),
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OracleError::Protocol("engine stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Protocol("engine stdout was not captured".to_string()))?;

        info!(program = %config.program, pid = child.id(), "engine session started");
        Ok(Self {
            program: config.program.clone(),
            io: Mutex::new(Some(EngineIo {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            })),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_open(&self) -> bool {
        self.io.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// End the session: close the engine's stdin and wait for it to exit.
    /// Further calls fail with [`OracleError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), OracleError> {
        let io = self.io.lock().map_err(|_| OracleError::Poisoned)?.take();
        let Some(EngineIo {
            mut child,
            stdin,
            stdout,
        }) = io
        else {
            return Ok(());
        };
        drop(stdin);
        drop(stdout);
        let status = child.wait()?;
        if status.success() {
            info!(program = %self.program, "engine session closed");
        } else {
            warn!(program = %self.program, %status, "engine exited with failure status");
        }
        Ok(())
    }

    fn call(&self, request: &EngineRequest) -> Result<EngineReply, OracleError> {
        let line = serde_json::to_string(request).map_err(|e| OracleError::Serde(e.to_string()))?;

        let mut guard = self.io.lock().map_err(|_| OracleError::Poisoned)?;
        let io = guard.as_mut().ok_or(OracleError::Closed)?;

        writeln!(io.stdin, "{line}")?;
        io.stdin.flush()?;

        let mut reply = String::new();
        if io.stdout.read_line(&mut reply)? == 0 {
            // Engine went away; drop the handles so later calls fail fast.
            if let Some(mut dead) = guard.take() {
                let _ = dead.child.wait();
            }
            return Err(OracleError::Closed);
        }
        debug!(program = %self.program, bytes = reply.len(), "engine reply");

        serde_json::from_str(reply.trim())
            .map_err(|e| OracleError::Protocol(format!("malformed engine reply: {e}")))
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.io.lock() {
            if let Some(mut io) = guard.take() {
                let _ = io.child.kill();
                let _ = io.child.wait();
            }
        }
    }
}

impl PhiIdOracle for EngineSession {
    fn phiid_full(
        &self,
        micro: &DMatrix<f64>,
        time_lag: usize,
        redundancy: RedundancyFunc,
    ) -> Result<PhiIdAtoms, OracleError> {
        let request = EngineRequest::Phiid {
            micro: matrix_rows(micro),
            time_lag,
            redundancy,
        };
        match self.call(&request)? {
            EngineReply::Ok {
                atoms: Some(atoms), ..
            } => Ok(atoms),
            EngineReply::Ok { atoms: None, .. } => Err(OracleError::Protocol(
                "phiid reply carried no atoms".to_string(),
            )),
            EngineReply::Error { message } => Err(OracleError::Engine(message)),
        }
    }
}

impl ShannonOracle for EngineSession {
    fn emergence(
        &self,
        quantity: ShannonQuantity,
        micro: &DMatrix<f64>,
        macro_series: &DMatrix<f64>,
        time_lag: usize,
        family: DistributionFamily,
    ) -> Result<f64, OracleError> {
        let request = EngineRequest::Emergence {
            quantity,
            micro: matrix_rows(micro),
            macro_series: matrix_rows(macro_series),
            time_lag,
            family,
        };
        match self.call(&request)? {
            EngineReply::Ok { value, .. } => Ok(value.unwrap_or(f64::NAN)),
            EngineReply::Error { message } => Err(OracleError::Engine(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_by_op() {
        let request = EngineRequest::Phiid {
            micro: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            time_lag: 2,
            redundancy: RedundancyFunc::Ccs,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"op":"phiid","micro":[[1.0,2.0],[3.0,4.0]],"time_lag":2,"redundancy":"ccs"}"#
        );

        let request = EngineRequest::Emergence {
            quantity: ShannonQuantity::Gamma,
            micro: vec![vec![1.0]],
            macro_series: vec![vec![2.0]],
            time_lag: 1,
            family: DistributionFamily::Gaussian,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.starts_with(r#"{"op":"emergence","quantity":"gamma""#));
        assert!(json.contains(r#""macro":[[2.0]]"#));
        assert!(json.contains(r#""family":"gaussian""#));
    }

    #[test]
    fn replies_decode_ok_and_error() {
        let ok: EngineReply = serde_json::from_str(r#"{"status":"ok","value":null}"#).unwrap();
        assert!(matches!(ok, EngineReply::Ok { value: None, atoms: None }));
        let err: EngineReply =
            serde_json::from_str(r#"{"status":"error","message":"singular"}"#).unwrap();
        assert!(matches!(err, EngineReply::Error { message } if message == "singular"));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let config = EngineConfig::new("/definitely/not/an/engine");
        let err = EngineSession::start(&config).unwrap_err();
        assert!(matches!(err, OracleError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn scripted_engine() -> EngineSession {
        let atoms = PhiIdAtoms {
            str: 0.25,
            stx: 0.125,
            sty: 0.125,
            sts: 0.5,
            ..PhiIdAtoms::default()
        };
        let atoms_json = serde_json::to_string(&atoms).unwrap();
        let script = format!(
            r#"while IFS= read -r line; do
  case "$line" in
    *'"op":"phiid"'*) echo '{{"status":"ok","atoms":{atoms_json}}}' ;;
    *'"quantity":"psi"'*) echo '{{"status":"ok","value":0.75}}' ;;
    *'"quantity":"delta"'*) echo '{{"status":"ok","value":null}}' ;;
    *) echo '{{"status":"error","message":"unsupported"}}' ;;
  esac
done"#
        );
        let config = EngineConfig::new("sh").with_args(["-c".to_string(), script]);
        EngineSession::start(&config).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn session_round_trips_requests() {
        let session = scripted_engine();
        let micro = DMatrix::from_row_slice(2, 3, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let macro_series = DMatrix::from_row_slice(3, 1, &[0.5, 0.7, 0.9]);

        let atoms = session.phiid_full(&micro, 1, RedundancyFunc::Mmi).unwrap();
        assert_eq!(atoms.whole_parts_emergence(), 1.0);

        let psi = session
            .psi(&micro.transpose(), &macro_series, 1, DistributionFamily::Gaussian)
            .unwrap();
        assert_eq!(psi, 0.75);
        let delta = session
            .delta(&micro.transpose(), &macro_series, 1, DistributionFamily::Gaussian)
            .unwrap();
        assert!(delta.is_nan());

        let err = session
            .gamma(&micro.transpose(), &macro_series, 1, DistributionFamily::Gaussian)
            .unwrap_err();
        assert!(matches!(err, OracleError::Engine(message) if message == "unsupported"));

        session.close().unwrap();
        assert!(!session.is_open());
        let err = session.phiid_full(&micro, 1, RedundancyFunc::Mmi).unwrap_err();
        assert!(matches!(err, OracleError::Closed));
        session.close().unwrap();
    }
}
