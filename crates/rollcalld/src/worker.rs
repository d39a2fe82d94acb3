use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{
    daily_report, summarize_range, AttendanceDay, AttendanceOutcome, DailyReport, EmployeeId,
    EmployeeProfile, EmployeeSummary, EnrolledTemplate, EuclideanMatcher, FaceTemplate,
    MatchError, MatchResult, Matcher, Recorder, RejectReason, TemplateError,
};
use rollcall_store::{EmployeeUpdate, NewEmployee, Store, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("employee {0} not found")]
    NotFound(EmployeeId),
    #[error("failed to spawn store worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("store worker exited")]
    ChannelClosed,
}

/// Matching and recording parameters fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub match_threshold: f32,
    pub template_dim: usize,
    pub recorder: Recorder,
}

/// Outcome of a scan as seen by the API layer.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Matched {
        employee: EmployeeProfile,
        distance: f32,
        confidence: f32,
        attendance: AttendanceOutcome,
    },
    Rejected(RejectReason),
}

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, Copy)]
pub struct StoreStatus {
    pub employees: usize,
    pub enrolled: usize,
}

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

/// Messages sent from HTTP handlers to the store worker thread.
enum StoreRequest {
    Scan {
        probe: FaceTemplate,
        at: NaiveDateTime,
        reply: Reply<ScanOutcome>,
    },
    CreateEmployee {
        new: NewEmployee,
        template: Option<FaceTemplate>,
        reply: Reply<EmployeeProfile>,
    },
    GetEmployee {
        id: EmployeeId,
        reply: Reply<EmployeeProfile>,
    },
    ListEmployees {
        reply: Reply<Vec<EmployeeProfile>>,
    },
    UpdateEmployee {
        id: EmployeeId,
        update: EmployeeUpdate,
        reply: Reply<EmployeeProfile>,
    },
    DeleteEmployee {
        id: EmployeeId,
        reply: Reply<()>,
    },
    SetTemplate {
        id: EmployeeId,
        template: FaceTemplate,
        reply: Reply<EmployeeProfile>,
    },
    ClearTemplate {
        id: EmployeeId,
        reply: Reply<EmployeeProfile>,
    },
    AttendanceOn {
        date: NaiveDate,
        reply: Reply<Vec<AttendanceDay>>,
    },
    History {
        id: EmployeeId,
        from: NaiveDate,
        to: NaiveDate,
        reply: Reply<Vec<AttendanceDay>>,
    },
    DailyReport {
        date: NaiveDate,
        reply: Reply<DailyReport>,
    },
    Summary {
        from: NaiveDate,
        to: NaiveDate,
        reply: Reply<Vec<EmployeeSummary>>,
    },
    Status {
        reply: Reply<StoreStatus>,
    },
}

/// Clone-safe handle to the store worker thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreRequest>,
}

impl StoreHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> StoreRequest,
    ) -> Result<T, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }

    /// Identify the probe and, on a match, record the attendance event.
    pub async fn scan(&self, probe: FaceTemplate, at: NaiveDateTime) -> Result<ScanOutcome, WorkerError> {
        self.request(|reply| StoreRequest::Scan { probe, at, reply }).await
    }

    pub async fn create_employee(
        &self,
        new: NewEmployee,
        template: Option<FaceTemplate>,
    ) -> Result<EmployeeProfile, WorkerError> {
        self.request(|reply| StoreRequest::CreateEmployee { new, template, reply })
            .await
    }

    pub async fn get_employee(&self, id: EmployeeId) -> Result<EmployeeProfile, WorkerError> {
        self.request(|reply| StoreRequest::GetEmployee { id, reply }).await
    }

    pub async fn list_employees(&self) -> Result<Vec<EmployeeProfile>, WorkerError> {
        self.request(|reply| StoreRequest::ListEmployees { reply }).await
    }

    pub async fn update_employee(
        &self,
        id: EmployeeId,
        update: EmployeeUpdate,
    ) -> Result<EmployeeProfile, WorkerError> {
        self.request(|reply| StoreRequest::UpdateEmployee { id, update, reply })
            .await
    }

    pub async fn delete_employee(&self, id: EmployeeId) -> Result<(), WorkerError> {
        self.request(|reply| StoreRequest::DeleteEmployee { id, reply }).await
    }

    pub async fn set_template(
        &self,
        id: EmployeeId,
        template: FaceTemplate,
    ) -> Result<EmployeeProfile, WorkerError> {
        self.request(|reply| StoreRequest::SetTemplate { id, template, reply })
            .await
    }

    pub async fn clear_template(&self, id: EmployeeId) -> Result<EmployeeProfile, WorkerError> {
        self.request(|reply| StoreRequest::ClearTemplate { id, reply }).await
    }

    pub async fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceDay>, WorkerError> {
        self.request(|reply| StoreRequest::AttendanceOn { date, reply }).await
    }

    pub async fn history(
        &self,
        id: EmployeeId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceDay>, WorkerError> {
        self.request(|reply| StoreRequest::History { id, from, to, reply })
            .await
    }

    pub async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport, WorkerError> {
        self.request(|reply| StoreRequest::DailyReport { date, reply }).await
    }

    pub async fn summary(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EmployeeSummary>, WorkerError> {
        self.request(|reply| StoreRequest::Summary { from, to, reply })
            .await
    }

    pub async fn status(&self) -> Result<StoreStatus, WorkerError> {
        self.request(|reply| StoreRequest::Status { reply }).await
    }
}

/// Spawn the store worker on a dedicated OS thread.
///
/// The worker owns the only database connection, so every request,
/// including every scan, is applied one at a time.
pub fn spawn_worker(store: Store, settings: WorkerSettings) -> Result<StoreHandle, WorkerError> {
    let (tx, mut rx) = mpsc::channel::<StoreRequest>(64);
    let mut worker = Worker {
        store,
        settings,
        gallery: None,
    };

    std::thread::Builder::new()
        .name("rollcall-store-worker".into())
        .spawn(move || {
            tracing::info!("store worker started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("store worker exiting");
        })?;

    Ok(StoreHandle { tx })
}

struct Worker {
    store: Store,
    settings: WorkerSettings,
    /// Decrypted templates; `None` until first use and after enrollment changes.
    gallery: Option<Vec<EnrolledTemplate>>,
}

impl Worker {
    fn handle(&mut self, req: StoreRequest) {
        match req {
            StoreRequest::Scan { probe, at, reply } => {
                let _ = reply.send(self.scan(&probe, at));
            }
            StoreRequest::CreateEmployee {
                new,
                template,
                reply,
            } => {
                let _ = reply.send(self.create_employee(new, template));
            }
            StoreRequest::GetEmployee { id, reply } => {
                let _ = reply.send(self.get_employee(id));
            }
            StoreRequest::ListEmployees { reply } => {
                let _ = reply.send(self.store.list_employees().map_err(Into::into));
            }
            StoreRequest::UpdateEmployee { id, update, reply } => {
                let _ = reply.send(self.update_employee(id, update));
            }
            StoreRequest::DeleteEmployee { id, reply } => {
                let _ = reply.send(self.delete_employee(id));
            }
            StoreRequest::SetTemplate {
                id,
                template,
                reply,
            } => {
                let _ = reply.send(self.set_template(id, template));
            }
            StoreRequest::ClearTemplate { id, reply } => {
                let _ = reply.send(self.clear_template(id));
            }
            StoreRequest::AttendanceOn { date, reply } => {
                let _ = reply.send(self.store.attendance_on(date).map_err(Into::into));
            }
            StoreRequest::History {
                id,
                from,
                to,
                reply,
            } => {
                let result = self
                    .get_employee(id)
                    .and_then(|_| Ok(self.store.attendance_between(from, to, Some(id))?));
                let _ = reply.send(result);
            }
            StoreRequest::DailyReport { date, reply } => {
                let _ = reply.send(self.daily_report(date));
            }
            StoreRequest::Summary { from, to, reply } => {
                let result = self
                    .store
                    .attendance_between(from, to, None)
                    .map(|days| summarize_range(&days, from, to))
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
            StoreRequest::Status { reply } => {
                let result = self
                    .store
                    .counts()
                    .map(|(employees, enrolled)| StoreStatus { employees, enrolled })
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
        }
    }

    fn scan(&mut self, probe: &FaceTemplate, at: NaiveDateTime) -> Result<ScanOutcome, WorkerError> {
        if self.gallery.is_none() {
            let loaded = self.store.load_gallery()?;
            tracing::debug!(templates = loaded.len(), "gallery loaded");
            self.gallery = Some(loaded);
        }
        let gallery = self.gallery.as_deref().unwrap_or_default();

        let result = EuclideanMatcher.compare(probe, gallery, self.settings.match_threshold)?;

        let (employee_id, distance, confidence) = match result {
            MatchResult::Matched {
                employee_id,
                distance,
                confidence,
            } => (employee_id, distance, confidence),
            MatchResult::Rejected(reason) => {
                match reason {
                    RejectReason::NotRecognized => {
                        tracing::debug!(gallery = gallery.len(), "probe not recognized")
                    }
                    RejectReason::NoEnrolledTemplates => {
                        tracing::info!("scan rejected: no enrolled templates")
                    }
                    // Already logged by the matcher.
                    RejectReason::AmbiguousMatch => {}
                }
                return Ok(ScanOutcome::Rejected(reason));
            }
        };

        let employee = self
            .store
            .get_employee(employee_id)?
            .ok_or(WorkerError::NotFound(employee_id))?;

        let attendance = self.store.record_scan(
            &self.settings.recorder,
            employee_id,
            at,
            Some(confidence),
        )?;

        tracing::info!(
            employee = %employee.id,
            name = %employee.name,
            distance,
            confidence,
            event = ?attendance.event(),
            "scan matched"
        );

        Ok(ScanOutcome::Matched {
            employee,
            distance,
            confidence,
            attendance,
        })
    }

    fn create_employee(
        &mut self,
        new: NewEmployee,
        template: Option<FaceTemplate>,
    ) -> Result<EmployeeProfile, WorkerError> {
        if new.name.trim().is_empty() {
            return Err(WorkerError::Invalid("employee name is empty".into()));
        }
        if let Some(t) = &template {
            t.validate(self.settings.template_dim)?;
        }
        let profile = self.store.create_employee(&new, template.as_ref())?;
        if profile.has_template {
            self.gallery = None;
        }
        tracing::info!(employee = %profile.id, name = %profile.name, enrolled = profile.has_template, "employee created");
        Ok(profile)
    }

    fn update_employee(
        &mut self,
        id: EmployeeId,
        update: EmployeeUpdate,
    ) -> Result<EmployeeProfile, WorkerError> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(WorkerError::Invalid("employee name is empty".into()));
        }
        let profile = self
            .store
            .update_employee(id, &update)?
            .ok_or(WorkerError::NotFound(id))?;
        if update.name.is_some() {
            // Gallery entries carry the display name.
            self.gallery = None;
        }
        Ok(profile)
    }

    fn get_employee(&self, id: EmployeeId) -> Result<EmployeeProfile, WorkerError> {
        self.store
            .get_employee(id)?
            .ok_or(WorkerError::NotFound(id))
    }

    fn delete_employee(&mut self, id: EmployeeId) -> Result<(), WorkerError> {
        if !self.store.delete_employee(id)? {
            return Err(WorkerError::NotFound(id));
        }
        self.gallery = None;
        tracing::info!(employee = %id, "employee deleted with attendance history");
        Ok(())
    }

    fn set_template(
        &mut self,
        id: EmployeeId,
        template: FaceTemplate,
    ) -> Result<EmployeeProfile, WorkerError> {
        template.validate(self.settings.template_dim)?;
        if !self.store.set_template(id, &template)? {
            return Err(WorkerError::NotFound(id));
        }
        self.gallery = None;
        tracing::info!(employee = %id, dim = template.dim(), "template enrolled");
        self.get_employee(id)
    }

    fn clear_template(&mut self, id: EmployeeId) -> Result<EmployeeProfile, WorkerError> {
        if !self.store.clear_template(id)? {
            return Err(WorkerError::NotFound(id));
        }
        self.gallery = None;
        tracing::info!(employee = %id, "template cleared");
        self.get_employee(id)
    }

    fn daily_report(&self, date: NaiveDate) -> Result<DailyReport, WorkerError> {
        let employees = self.store.list_employees()?;
        let days = self.store.attendance_on(date)?;
        Ok(daily_report(&employees, &days, date))
    }
}
