//! Sensor service
//!
//! Owns the one engine and the one worker of the simulated sensor and hands
//! out sessions on top of them. At most one session is open at a time.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fpsim_core::{
    Engine, SensorId, Session, SessionCallback, SessionState, SingleFlight, UserId, Worker,
};

use crate::config::{DaemonConfig, SensorConfig, SensorStrength, SensorType};
use crate::engine::{EngineSnapshot, SimulatedEngine};
use crate::error::{DaemonError, Result};

/// Sensor description reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorProps {
    pub sensor_id: i32,
    pub sensor_type: SensorType,
    pub strength: SensorStrength,
    pub max_enrollments: usize,
    pub under_display: bool,
}

/// Service state dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub sensor_id: i32,
    pub session_open: bool,
    pub scheduled_state: Option<SessionState>,
    pub current_state: Option<SessionState>,
    pub engine: EngineSnapshot,
}

/// The simulated sensor and its session slot
pub struct SensorService {
    sensor: SensorConfig,
    single_flight: SingleFlight,
    engine: Arc<SimulatedEngine>,
    worker: Arc<Worker>,
    session: Mutex<Option<Arc<Session>>>,
}

impl SensorService {
    /// Build the service and start its worker
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let worker = Worker::spawn(config.worker_name.clone())?;
        Ok(Self {
            sensor: config.sensor.clone(),
            single_flight: config.single_flight,
            engine: Arc::new(SimulatedEngine::new(config.engine.clone())),
            worker: Arc::new(worker),
            session: Mutex::new(None),
        })
    }

    pub fn sensor_props(&self) -> SensorProps {
        SensorProps {
            sensor_id: self.sensor.sensor_id,
            sensor_type: self.sensor.sensor_type,
            strength: self.sensor.strength,
            max_enrollments: self.engine.config().max_enrollments,
            under_display: self.sensor.sensor_type.is_under_display(),
        }
    }

    /// Open a session for `user_id` on `sensor_id`
    pub fn create_session(
        &self,
        sensor_id: i32,
        user_id: i32,
        callback: Arc<dyn SessionCallback>,
    ) -> Result<Arc<Session>> {
        let sensor = SensorId::new(sensor_id)?;
        let user = UserId::new(user_id)?;
        if sensor_id != self.sensor.sensor_id {
            warn!("Session requested for unknown sensor {}", sensor_id);
            return Err(DaemonError::UnknownSensor(sensor_id));
        }

        let mut slot = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| !s.is_closed()) {
            warn!("Session already open on sensor {}", sensor_id);
            return Err(DaemonError::SessionAlreadyOpen(sensor_id));
        }

        let engine: Arc<dyn Engine> = self.engine.clone();
        let session = Arc::new(Session::new(
            sensor,
            user,
            callback,
            engine,
            Arc::clone(&self.worker),
            self.single_flight,
        ));
        *slot = Some(Arc::clone(&session));
        info!("Opened session for user {} on sensor {}", user, sensor);
        Ok(session)
    }

    /// Most recently created session, open or closed
    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Simulate a finger landing on the sensor outside of any session
    pub fn sim_finger_down(&self) {
        info!("Simulating finger down");
        self.engine.notify_finger_down();
    }

    pub fn status(&self) -> ServiceStatus {
        let session = self.current_session();
        ServiceStatus {
            sensor_id: self.sensor.sensor_id,
            session_open: session.as_ref().is_some_and(|s| !s.is_closed()),
            scheduled_state: session.as_ref().map(|s| s.scheduled_state()),
            current_state: session.as_ref().map(|s| s.current_state()),
            engine: self.engine.snapshot(),
        }
    }

    /// Close any open session and stop the worker
    pub fn shutdown(&self) {
        if let Some(session) = self.current_session() {
            session.close();
        }
        self.worker.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpsim_core::{ChannelCallback, CoreError};

    fn service() -> SensorService {
        let mut config = DaemonConfig::default();
        config.engine.step_latency_ms = 0;
        config.worker_name = "service-test".to_string();
        SensorService::new(&config).unwrap()
    }

    fn callback() -> Arc<dyn SessionCallback> {
        let (callback, _rx) = ChannelCallback::channel();
        Arc::new(callback)
    }

    #[test]
    fn test_sensor_props() {
        let props = service().sensor_props();
        assert_eq!(props.sensor_id, 5);
        assert_eq!(props.max_enrollments, 5);
        assert!(props.under_display);
    }

    #[test]
    fn test_create_session_validates_ids() {
        let service = service();
        assert!(matches!(
            service.create_session(-1, 0, callback()),
            Err(DaemonError::Core(CoreError::InvalidSensorId(-1)))
        ));
        assert!(matches!(
            service.create_session(5, -3, callback()),
            Err(DaemonError::Core(CoreError::InvalidUserId(-3)))
        ));
        assert!(matches!(
            service.create_session(6, 0, callback()),
            Err(DaemonError::UnknownSensor(6))
        ));
        assert!(service.current_session().is_none());
    }

    #[test]
    fn test_one_open_session_at_a_time() {
        let service = service();
        let first = service.create_session(5, 0, callback()).unwrap();
        assert!(matches!(
            service.create_session(5, 1, callback()),
            Err(DaemonError::SessionAlreadyOpen(5))
        ));

        first.close();
        let second = service.create_session(5, 1, callback()).unwrap();
        assert_eq!(second.user_id().get(), 1);
        assert!(service.status().session_open);
    }

    #[test]
    fn test_status_without_session() {
        let service = service();
        service.sim_finger_down();
        let status = service.status();
        assert!(!status.session_open);
        assert_eq!(status.current_state, None);
        assert!(status.engine.finger_down);
    }
}
