//! Toolbar panel: discovery, device selection, connection and measurement buttons.
//!
//! Sits between the menu bar and the plot area.

use egui::{Color32, RichText, Ui};

use crate::frontend::state::AppAction;
use crate::session::{ConnectionState, SessionModel};

/// Context needed to render the toolbar.
pub struct ToolbarContext<'a> {
    pub model: &'a SessionModel,
    pub selected_device: Option<usize>,
}

/// Render the main application toolbar.
///
/// Returns the actions the user triggered this frame.
pub fn render_toolbar(ui: &mut Ui, ctx: &ToolbarContext<'_>) -> Vec<AppAction> {
    let mut actions = Vec::new();

    ui.horizontal(|ui| {
        ui.spacing_mut().item_spacing.x = 4.0;

        render_connection_group(ui, ctx, &mut actions);

        ui.separator();

        render_measurement_group(ui, ctx, &mut actions);

        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            render_outcome(ui, ctx);
        });
    });

    actions
}

fn render_connection_group(ui: &mut Ui, ctx: &ToolbarContext<'_>, actions: &mut Vec<AppAction>) {
    let model = ctx.model;

    match model.state() {
        ConnectionState::Disconnected => {
            ui.colored_label(Color32::GRAY, "●");

            if ui
                .add_enabled(model.can_discover(), egui::Button::new("Discover"))
                .on_hover_text("Scan USB, Bluetooth and serial ports")
                .clicked()
            {
                actions.push(AppAction::Discover);
            }

            let selected = ctx.selected_device.and_then(|i| model.devices().get(i));
            let selected_text = selected
                .map(|d| d.name.clone())
                .unwrap_or_else(|| "Select device...".to_string());

            egui::ComboBox::from_id_salt("toolbar_device_selector")
                .selected_text(selected_text)
                .width(220.0)
                .show_ui(ui, |ui| {
                    if model.devices().is_empty() {
                        ui.label("No devices found");
                    }
                    for (i, device) in model.devices().iter().enumerate() {
                        if ui
                            .selectable_label(ctx.selected_device == Some(i), device.display_name())
                            .clicked()
                        {
                            actions.push(AppAction::SelectDevice(i));
                        }
                    }
                });

            let response = ui
                .add_enabled(model.can_connect() && selected.is_some(), egui::Button::new("Connect"))
                .on_hover_text("Connect to the selected device");
            if response.clicked() {
                if let Some(device) = selected {
                    actions.push(AppAction::Connect(device.clone()));
                }
            }
        }
        ConnectionState::Connecting => {
            ui.colored_label(Color32::YELLOW, "●");
            ui.add_enabled(false, egui::Button::new("Connecting..."));
        }
        ConnectionState::Disconnecting => {
            ui.colored_label(Color32::YELLOW, "●");
            ui.add_enabled(false, egui::Button::new("Disconnecting..."));
        }
        ConnectionState::Idle | ConnectionState::Pretreatment | ConnectionState::Measuring => {
            ui.colored_label(Color32::GREEN, "●");
            if let Some(device) = model.connected_device() {
                ui.label(RichText::new(&device.name).strong());
            }

            let btn = egui::Button::new(RichText::new("Disconnect").color(Color32::WHITE))
                .fill(Color32::from_rgb(50, 120, 50));
            if ui
                .add_enabled(model.can_disconnect(), btn)
                .on_hover_text("Disconnect from the instrument")
                .clicked()
            {
                actions.push(AppAction::Disconnect);
            }
        }
    }
}

fn render_measurement_group(ui: &mut Ui, ctx: &ToolbarContext<'_>, actions: &mut Vec<AppAction>) {
    let model = ctx.model;

    if model.state().is_measuring() {
        let label = if model.abort_pending() { "Aborting..." } else { "Abort" };
        let btn = egui::Button::new(RichText::new(label).color(Color32::WHITE))
            .fill(Color32::from_rgb(180, 50, 50));
        if ui
            .add_enabled(model.can_abort(), btn)
            .on_hover_text("Stop the running measurement")
            .clicked()
        {
            actions.push(AppAction::Abort);
        }
        ui.colored_label(Color32::YELLOW, model.state().to_string());
    } else {
        let btn = egui::Button::new(RichText::new("Measure").color(Color32::WHITE))
            .fill(Color32::from_rgb(50, 120, 50));
        if ui
            .add_enabled(model.can_measure(), btn)
            .on_hover_text("Run the method configured on the left")
            .clicked()
        {
            actions.push(AppAction::StartMeasurement);
        }
    }
}

fn render_outcome(ui: &mut Ui, ctx: &ToolbarContext<'_>) {
    use crate::session::MeasurementOutcome;

    match ctx.model.last_outcome() {
        Some(MeasurementOutcome::Completed) => {
            ui.colored_label(Color32::from_rgb(100, 255, 100), "Completed");
        }
        Some(MeasurementOutcome::Aborted) => {
            ui.colored_label(Color32::YELLOW, "Aborted");
        }
        Some(MeasurementOutcome::Failed(reason)) => {
            ui.colored_label(Color32::RED, "Failed").on_hover_text(reason.as_str());
        }
        None => {}
    }
}
