//! Panel components for the frontend UI
//!
//! # Panels
//!
//! - [`MethodPanel`] - Edits the method form (technique, pretreatment, ranges)
//! - [`LogPanel`] - Scrolling view of the session log

use crate::config::{CurrentRange, MethodForm, TechniqueKind};
use crate::session::SessionModel;
use crate::types::LogLevel;
use egui::{Color32, RichText, Ui};

/// Renders the method editor
pub struct MethodPanel;

impl MethodPanel {
    /// Render the form. Inputs are disabled while `editable` is false.
    pub fn render(ui: &mut Ui, form: &mut MethodForm, editable: bool) {
        ui.add_enabled_ui(editable, |ui| {
            ui.heading("Method");
            ui.add_space(4.0);

            egui::ComboBox::from_id_salt("method_technique")
                .selected_text(form.technique.to_string())
                .width(220.0)
                .show_ui(ui, |ui| {
                    for kind in TechniqueKind::ALL {
                        ui.selectable_value(&mut form.technique, kind, kind.to_string());
                    }
                });

            ui.add_space(4.0);

            egui::Grid::new("method_technique_grid")
                .num_columns(2)
                .spacing([8.0, 4.0])
                .show(ui, |ui| match form.technique {
                    TechniqueKind::LinearSweep => {
                        field(ui, "E begin (V)", &mut form.e_begin);
                        field(ui, "E end (V)", &mut form.e_end);
                        field(ui, "E step (V)", &mut form.e_step);
                        field(ui, "Scan rate (V/s)", &mut form.scan_rate);
                    }
                    TechniqueKind::CyclicVoltammetry => {
                        field(ui, "E begin (V)", &mut form.e_begin);
                        field(ui, "E vertex 1 (V)", &mut form.e_vertex1);
                        field(ui, "E vertex 2 (V)", &mut form.e_vertex2);
                        field(ui, "E step (V)", &mut form.e_step);
                        field(ui, "Scan rate (V/s)", &mut form.scan_rate);
                        field(ui, "Scans", &mut form.n_scans);
                    }
                    TechniqueKind::Chronoamperometry => {
                        field(ui, "E dc (V)", &mut form.e_dc);
                        field(ui, "Interval (s)", &mut form.interval_time);
                        field(ui, "Run time (s)", &mut form.run_time);
                    }
                });

            ui.separator();

            egui::CollapsingHeader::new("Pretreatment")
                .default_open(false)
                .show(ui, |ui| {
                    egui::Grid::new("method_pretreatment_grid")
                        .num_columns(2)
                        .spacing([8.0, 4.0])
                        .show(ui, |ui| {
                            field(ui, "Conditioning E (V)", &mut form.conditioning_potential);
                            field(ui, "Conditioning t (s)", &mut form.conditioning_time);
                            field(ui, "Deposition E (V)", &mut form.deposition_potential);
                            field(ui, "Deposition t (s)", &mut form.deposition_time);
                            field(ui, "Equilibration t (s)", &mut form.equilibration_time);
                        });
                });

            egui::CollapsingHeader::new("Current ranges")
                .default_open(false)
                .show(ui, |ui| {
                    range_combo(ui, "Min", "range_min", &mut form.current_range.min);
                    range_combo(ui, "Max", "range_max", &mut form.current_range.max);
                    range_combo(ui, "Start", "range_start", &mut form.current_range.start);
                });
        });
    }
}

fn field(ui: &mut Ui, label: &str, value: &mut String) {
    ui.label(label);
    ui.add(egui::TextEdit::singleline(value).desired_width(80.0));
    ui.end_row();
}

fn range_combo(ui: &mut Ui, label: &str, id: &str, value: &mut CurrentRange) {
    ui.horizontal(|ui| {
        ui.label(label);
        egui::ComboBox::from_id_salt(id)
            .selected_text(value.to_string())
            .show_ui(ui, |ui| {
                for range in CurrentRange::ALL {
                    ui.selectable_value(value, range, range.to_string());
                }
            });
    });
}

/// Renders the session log
pub struct LogPanel;

impl LogPanel {
    /// Render the log, newest entry at the bottom. Returns true if "Clear" was clicked.
    pub fn render(ui: &mut Ui, model: &SessionModel) -> bool {
        let mut clear = false;

        ui.horizontal(|ui| {
            ui.label(RichText::new("Log").strong());
            ui.label(RichText::new(format!("({} entries)", model.log().len())).small());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.small_button("Clear").clicked() {
                    clear = true;
                }
            });
        });

        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for entry in model.log() {
                    let color = match entry.level {
                        LogLevel::Info => ui.visuals().text_color(),
                        LogLevel::Warning => Color32::YELLOW,
                        LogLevel::Error => Color32::from_rgb(255, 100, 100),
                    };
                    ui.label(RichText::new(entry.to_string()).monospace().color(color));
                }
            });

        clear
    }
}
