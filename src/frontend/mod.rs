//! Frontend module for egui UI
//!
//! The app owns the UI side of a [`ThreadMarshal`](crate::marshal::ThreadMarshal):
//! every frame it pumps the queued jobs, which runs session listeners on this
//! thread. The listener forwards [`SessionEvent`]s into a crossbeam channel
//! that the frame then folds into a [`SessionModel`]. Panels only read the
//! model and emit [`AppAction`]s; session operations are spawned on the tokio
//! runtime and never awaited from `update`.
//!
//! # Main Types
//!
//! - [`EchemApp`] - Main application state implementing [`eframe::App`]
//! - [`CurvePlot`] - Plot configuration and rendering
//!
//! # Submodules
//!
//! - `panels` - Method editor and log view
//! - `plot` - Curve rendering with egui_plot
//! - `toolbar` - Device and measurement controls
//! - `status_bar` - Connection and instrument summary

mod panels;
mod plot;
pub mod state;
mod status_bar;
mod toolbar;

pub use panels::{LogPanel, MethodPanel};
pub use plot::CurvePlot;
pub use state::AppAction;

use crate::config::{AppConfig, AppState, MethodForm};
use crate::instrument::Subscription;
use crate::marshal::UiPump;
use crate::session::{MeasurementSession, SessionEvent, SessionModel};
use crate::types::LogEntry;
use crossbeam_channel::Receiver;
use std::sync::{Arc, OnceLock};
use toolbar::ToolbarContext;

/// Main application
pub struct EchemApp {
    runtime: tokio::runtime::Handle,
    session: Arc<MeasurementSession>,
    pump: UiPump,
    events: Receiver<SessionEvent>,
    _listener: Subscription,
    model: SessionModel,
    config: AppConfig,
    app_state: AppState,
    method_form: MethodForm,
    selected_device: Option<usize>,
    plot: CurvePlot,
}

impl EchemApp {
    /// Create a new application instance
    ///
    /// `egui_ctx` is the slot the marshal's waker reads to request a repaint;
    /// it is filled here once the context exists.
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        runtime: tokio::runtime::Handle,
        session: Arc<MeasurementSession>,
        pump: UiPump,
        egui_ctx: Arc<OnceLock<egui::Context>>,
        config: AppConfig,
        app_state: AppState,
    ) -> Self {
        if egui_ctx.set(cc.egui_ctx.clone()).is_err() {
            tracing::warn!("Repaint context was already set");
        }
        apply_visuals(&cc.egui_ctx, app_state.dark_mode);

        let (tx, events) = crossbeam_channel::unbounded();
        let listener = session.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });

        let method = app_state
            .last_method
            .clone()
            .unwrap_or_else(|| config.method.clone());

        let app = Self {
            runtime,
            model: SessionModel::new(session.config().log_capacity),
            session,
            pump,
            events,
            _listener: listener,
            method_form: MethodForm::from_config(&method),
            config,
            app_state,
            selected_device: None,
            plot: CurvePlot::default(),
        };

        app.spawn_discovery();
        app
    }

    /// Run queued UI jobs, then fold the resulting events into the model
    fn process_session_events(&mut self) -> bool {
        self.pump.pump();

        let mut had_events = false;
        for event in self.events.try_iter() {
            had_events = true;
            self.model.apply(&event);

            match &event {
                SessionEvent::DevicesDiscovered(devices) => {
                    let still_valid = self.selected_device.is_some_and(|i| i < devices.len());
                    if !still_valid {
                        self.selected_device = self
                            .app_state
                            .preferred_device_index(devices)
                            .or(if devices.is_empty() { None } else { Some(0) });
                    }
                }
                SessionEvent::Connected(device) => {
                    self.app_state.update_last_device(device);
                    if let Err(e) = self.app_state.save() {
                        tracing::warn!("Failed to save app state: {}", e);
                    }
                }
                _ => {}
            }
        }
        had_events
    }

    fn handle_action(&mut self, ctx: &egui::Context, action: AppAction) {
        tracing::debug!("UI action: {:?}", action);
        match action {
            AppAction::Discover => self.spawn_discovery(),
            AppAction::SelectDevice(index) => {
                self.selected_device = Some(index);
            }
            AppAction::Connect(device) => {
                let session = self.session.clone();
                self.runtime.spawn(async move {
                    if let Err(e) = session.connect(&device).await {
                        tracing::debug!("Connect finished with error: {}", e);
                    }
                });
            }
            AppAction::Disconnect => {
                let session = self.session.clone();
                self.runtime.spawn(async move {
                    if let Err(e) = session.disconnect().await {
                        tracing::debug!("Disconnect finished with error: {}", e);
                    }
                });
            }
            AppAction::StartMeasurement => match self.method_form.parse() {
                Ok(method) => {
                    self.app_state.last_method = Some(method.clone());
                    let session = self.session.clone();
                    self.runtime.spawn(async move {
                        if let Err(e) = session.start_measurement(&method).await {
                            tracing::debug!("Measurement not started: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Method rejected: {}", e);
                    self.model.push_log(LogEntry::warning(e.to_string()));
                }
            },
            AppAction::Abort => {
                let session = self.session.clone();
                self.runtime.spawn(async move {
                    match session.abort_measurement().await {
                        Ok(true) => tracing::debug!("Abort confirmed"),
                        Ok(false) => tracing::debug!("Nothing to abort"),
                        Err(e) => tracing::debug!("Abort failed: {}", e),
                    }
                });
            }
            AppAction::ClearLog => self.model.clear_log(),
            AppAction::SetDarkMode(dark) => {
                self.app_state.dark_mode = dark;
                apply_visuals(ctx, dark);
            }
        }
    }

    fn spawn_discovery(&self) {
        let session = self.session.clone();
        let timeout = self.config.session.discover_timeout();
        self.runtime.spawn(async move {
            if let Err(e) = session.discover(timeout).await {
                tracing::debug!("Discovery finished with error: {}", e);
            }
        });
    }
}

fn apply_visuals(ctx: &egui::Context, dark: bool) {
    if dark {
        ctx.set_visuals(egui::Visuals::dark());
    } else {
        ctx.set_visuals(egui::Visuals::light());
    }
}

impl eframe::App for EchemApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.process_session_events() || self.model.state().is_measuring() {
            ctx.request_repaint();
        }

        let mut actions = Vec::new();

        // Menu bar
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("Session", |ui| {
                    if ui
                        .add_enabled(self.model.can_discover(), egui::Button::new("Discover"))
                        .clicked()
                    {
                        actions.push(AppAction::Discover);
                        ui.close();
                    }
                    if ui
                        .add_enabled(self.model.can_disconnect(), egui::Button::new("Disconnect"))
                        .clicked()
                    {
                        actions.push(AppAction::Disconnect);
                        ui.close();
                    }
                });

                ui.menu_button("View", |ui| {
                    let mut dark = self.app_state.dark_mode;
                    if ui.checkbox(&mut dark, "Dark mode").changed() {
                        actions.push(AppAction::SetDarkMode(dark));
                    }
                    ui.checkbox(&mut self.plot.show_grid, "Plot grid");
                    if ui.button("Clear log").clicked() {
                        actions.push(AppAction::ClearLog);
                        ui.close();
                    }
                });
            });
        });

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            let toolbar = ToolbarContext {
                model: &self.model,
                selected_device: self.selected_device,
            };
            actions.extend(toolbar::render_toolbar(ui, &toolbar));
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            status_bar::render_status_bar(ui, &self.model);
        });

        egui::TopBottomPanel::bottom("log_panel")
            .resizable(true)
            .default_height(140.0)
            .show(ctx, |ui| {
                if LogPanel::render(ui, &self.model) {
                    actions.push(AppAction::ClearLog);
                }
            });

        egui::SidePanel::left("method_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                let editable = !self.model.state().is_measuring();
                MethodPanel::render(ui, &mut self.method_form, editable);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.plot.render(ui, self.model.curves());
        });

        for action in actions {
            self.handle_action(ctx, action);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Err(e) = self.app_state.save() {
            tracing::warn!("Failed to save app state: {}", e);
        }
    }
}
