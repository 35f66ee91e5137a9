//! CLI command implementations

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::debug;

use fpsim_core::{PointerContext, SessionEvent};
use fpsim_daemon::IpcRequest;

use crate::client::{ClientError, FpsimClient, SessionClient};

/// fpsim CLI - drive the simulated fingerprint sensor
#[derive(Parser)]
#[command(name = "fpsim")]
#[command(about = "Client for the simulated fingerprint sensor daemon")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to daemon socket
    #[arg(long)]
    pub socket: Option<String>,

    /// Sensor to open the session on (defaults to the daemon's sensor)
    #[arg(long)]
    pub sensor: Option<i32>,

    /// User to open the session for
    #[arg(long, default_value = "0")]
    pub user: i32,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check daemon status
    Status,

    /// Show sensor properties
    Props,

    /// Enroll a new finger
    Enroll,

    /// Authenticate against enrolled fingers
    Authenticate {
        /// Operation id bound into the issued token
        #[arg(long, default_value = "0")]
        operation_id: i64,

        /// Cancel the operation after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// Wait for any finger on the sensor
    Detect {
        /// Cancel the operation after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// List enrollments
    List,

    /// Remove enrollments
    Remove {
        /// Enrollment ids to remove
        #[arg(required = true)]
        ids: Vec<i32>,
    },

    /// Show the authenticator id
    AuthenticatorId {
        /// Rotate it instead
        #[arg(long)]
        invalidate: bool,
    },

    /// Clear a lockout
    ResetLockout,

    /// Send a pointer down, UI ready and pointer up sequence
    Touch {
        #[arg(long, default_value = "0")]
        x: i32,

        #[arg(long, default_value = "0")]
        y: i32,
    },

    /// Put a finger on the sensor
    FingerDown,
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = match cli.socket {
        Some(socket) => FpsimClient::with_socket_path(socket.into()),
        None => FpsimClient::new(),
    };

    match cli.command {
        Commands::Status => {
            match client.ping().await {
                Ok(version) => println!("fpsim daemon v{} is running", version),
                Err(ClientError::DaemonNotRunning) => {
                    println!("fpsim daemon is not running");
                    println!("Start it with: fpsim-daemon");
                    return Err(ClientError::DaemonNotRunning);
                }
                Err(e) => return Err(e),
            }

            let status = client.status().await?;
            println!("Sensor: {}", status.sensor_id);
            match (status.session_open, status.scheduled_state, status.current_state) {
                (true, Some(scheduled), Some(current)) => {
                    println!("Session: open (scheduled {}, current {})", scheduled, current)
                }
                _ => println!("Session: none"),
            }
            println!("Enrollments: {:?}", status.engine.enrollments);
            println!("Authenticator id: {}", status.engine.authenticator_id);
            println!("Failed attempts: {}", status.engine.failed_attempts);
            println!(
                "Challenge pending: {}",
                if status.engine.challenge_pending { "Yes" } else { "No" }
            );
        }

        Commands::Props => {
            let props = client.sensor_props().await?;
            println!("Sensor {}", props.sensor_id);
            println!("  Type: {:?}", props.sensor_type);
            println!("  Strength: {:?}", props.strength);
            println!("  Max enrollments: {}", props.max_enrollments);
            println!(
                "  Under display: {}",
                if props.under_display { "Yes" } else { "No" }
            );
        }

        Commands::FingerDown => {
            client.finger_down().await?;
            println!("Finger down");
        }

        command => {
            let sensor = match cli.sensor {
                Some(sensor) => sensor,
                None => client.sensor_props().await?.sensor_id,
            };
            debug!("Opening session on sensor {} for user {}", sensor, cli.user);
            let mut session = client.open_session(sensor, cli.user).await?;
            run_in_session(&mut session, command).await?;
            session.close().await?;
        }
    }

    Ok(())
}

async fn run_in_session(session: &mut SessionClient, command: Commands) -> Result<(), ClientError> {
    match command {
        Commands::Enroll => {
            let hat = session.challenge_token().await?;
            let challenge = hat.challenge;
            print_events(&session.run(IpcRequest::Enroll { hat }).await?);
            print_events(
                &session
                    .run(IpcRequest::RevokeChallenge { challenge })
                    .await?,
            );
        }

        Commands::Authenticate {
            operation_id,
            cancel_after_ms,
        } => {
            let handle = session
                .schedule(IpcRequest::Authenticate { operation_id })
                .await?;
            cancel_after(session, handle, cancel_after_ms).await?;
            print_events(&session.until_terminal().await?);
        }

        Commands::Detect { cancel_after_ms } => {
            let handle = session.schedule(IpcRequest::DetectInteraction).await?;
            cancel_after(session, handle, cancel_after_ms).await?;
            print_events(&session.until_terminal().await?);
        }

        Commands::List => {
            print_events(&session.run(IpcRequest::EnumerateEnrollments).await?);
        }

        Commands::Remove { ids } => {
            let request = IpcRequest::RemoveEnrollments {
                enrollment_ids: ids,
            };
            print_events(&session.run(request).await?);
        }

        Commands::AuthenticatorId { invalidate } => {
            let request = if invalidate {
                IpcRequest::InvalidateAuthenticatorId
            } else {
                IpcRequest::GetAuthenticatorId
            };
            print_events(&session.run(request).await?);
        }

        Commands::ResetLockout => {
            let hat = session.challenge_token().await?;
            print_events(&session.run(IpcRequest::ResetLockout { hat }).await?);
        }

        Commands::Touch { x, y } => {
            let pointer = PointerContext {
                pointer_id: 0,
                x,
                y,
                ..PointerContext::default()
            };
            session.signal(IpcRequest::PointerDown { pointer }).await?;
            session.signal(IpcRequest::UiReady).await?;
            session
                .signal(IpcRequest::PointerUp {
                    pointer_id: pointer.pointer_id,
                })
                .await?;
            println!("Touch delivered at ({}, {})", x, y);
        }

        Commands::Status | Commands::Props | Commands::FingerDown => {}
    }

    Ok(())
}

async fn cancel_after(
    session: &mut SessionClient,
    handle: Option<String>,
    delay_ms: Option<u64>,
) -> Result<(), ClientError> {
    if let (Some(handle), Some(delay_ms)) = (handle, delay_ms) {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        debug!("Canceling {} after {} ms", handle, delay_ms);
        session.cancel(&handle).await?;
        println!("Cancel requested");
    }
    Ok(())
}

fn print_events(events: &[SessionEvent]) {
    for event in events {
        println!("{}", describe(event));
    }
}

/// One-line human readable form of a session event
pub fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::ChallengeGenerated { challenge } => {
            format!("Challenge generated: {}", challenge)
        }
        SessionEvent::ChallengeRevoked { challenge } => format!("Challenge revoked: {}", challenge),
        SessionEvent::Acquired { info, .. } => format!("Acquired: {:?}", info),
        SessionEvent::Error { error, vendor_code } => {
            format!("Error: {} (vendor code {})", error, vendor_code)
        }
        SessionEvent::EnrollmentProgress {
            enrollment_id,
            remaining,
        } => format!(
            "Enrollment {}: {} step(s) remaining",
            enrollment_id, remaining
        ),
        SessionEvent::AuthenticationSucceeded { enrollment_id, hat } => format!(
            "Authenticated as enrollment {} (token issued at {} ms)",
            enrollment_id, hat.timestamp_ms
        ),
        SessionEvent::AuthenticationFailed => "Authentication failed".to_string(),
        SessionEvent::LockoutTimed { duration_ms } => {
            format!("Locked out for {} ms", duration_ms)
        }
        SessionEvent::LockoutPermanent => "Locked out permanently".to_string(),
        SessionEvent::LockoutCleared => "Lockout cleared".to_string(),
        SessionEvent::InteractionDetected => "Interaction detected".to_string(),
        SessionEvent::EnrollmentsEnumerated { enrollment_ids } => {
            format!("Enrollments: {:?}", enrollment_ids)
        }
        SessionEvent::EnrollmentsRemoved { enrollment_ids } => {
            format!("Removed: {:?}", enrollment_ids)
        }
        SessionEvent::AuthenticatorIdRetrieved { authenticator_id } => {
            format!("Authenticator id: {}", authenticator_id)
        }
        SessionEvent::AuthenticatorIdInvalidated { authenticator_id } => {
            format!("New authenticator id: {}", authenticator_id)
        }
        SessionEvent::SessionClosed => "Session closed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpsim_core::ErrorKind;

    #[test]
    fn test_parse_authenticate_with_cancel() {
        let cli = Cli::try_parse_from([
            "fpsim",
            "--socket",
            "/tmp/x.sock",
            "authenticate",
            "--operation-id",
            "7",
            "--cancel-after-ms",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.socket.as_deref(), Some("/tmp/x.sock"));
        assert_eq!(cli.user, 0);
        match cli.command {
            Commands::Authenticate {
                operation_id,
                cancel_after_ms,
            } => {
                assert_eq!(operation_id, 7);
                assert_eq!(cancel_after_ms, Some(50));
            }
            _ => panic!("expected authenticate"),
        }
    }

    #[test]
    fn test_remove_requires_ids() {
        assert!(Cli::try_parse_from(["fpsim", "remove"]).is_err());
        let cli = Cli::try_parse_from(["fpsim", "remove", "1", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Remove { ids } if ids == vec![1, 3]));
    }

    #[test]
    fn test_describe_events() {
        assert_eq!(
            describe(&SessionEvent::EnrollmentProgress {
                enrollment_id: 2,
                remaining: 1
            }),
            "Enrollment 2: 1 step(s) remaining"
        );
        assert_eq!(
            describe(&SessionEvent::Error {
                error: ErrorKind::Canceled,
                vendor_code: 0
            }),
            "Error: CANCELED (vendor code 0)"
        );
    }
}
