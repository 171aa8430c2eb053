//! Status bar panel showing connection, instrument and curve info.

use egui::{Color32, RichText, Ui};

use crate::session::{ConnectionState, SessionModel};

/// Render the status bar.
pub fn render_status_bar(ui: &mut Ui, model: &SessionModel) {
    ui.horizontal(|ui| {
        ui.spacing_mut().item_spacing.x = 8.0;

        let status_color = match model.state() {
            ConnectionState::Disconnected => Color32::GRAY,
            ConnectionState::Connecting | ConnectionState::Disconnecting => Color32::YELLOW,
            ConnectionState::Idle => Color32::GREEN,
            ConnectionState::Pretreatment | ConnectionState::Measuring => {
                Color32::from_rgb(100, 180, 255)
            }
        };
        ui.colored_label(status_color, "●");
        let text = match model.connected_device() {
            Some(device) => format!("{}: {}", model.state(), device.name),
            None => model.state().to_string(),
        };
        ui.label(RichText::new(text).small());

        if let Some(state) = model.device_state() {
            ui.separator();
            ui.label(RichText::new(format!("Instrument: {}", state)).small());
        }

        if let Some(reading) = model.status() {
            ui.separator();
            ui.label(
                RichText::new(format!(
                    "E = {:.3} V  i = {:.3} µA",
                    reading.potential, reading.current
                ))
                .small(),
            );
            if reading.overload {
                ui.colored_label(Color32::RED, RichText::new("OVERLOAD").small());
            }
        }

        ui.separator();
        let points: usize = model.curves().iter().map(|c| c.points.len()).sum();
        ui.label(RichText::new(format!("Points: {}", points)).small());

        if model.violations() > 0 {
            ui.separator();
            ui.colored_label(
                Color32::LIGHT_RED,
                RichText::new(format!("Protocol errors: {}", model.violations())).small(),
            );
        }
    });
}
