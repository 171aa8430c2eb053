//! Curve plot rendered with egui_plot

use egui::{Color32, Ui};
use egui_plot::{Corner, Legend, Line, Plot, PlotPoints};

use crate::session::PlotCurve;

const PALETTE: [Color32; 4] = [
    Color32::from_rgb(100, 180, 255),
    Color32::from_rgb(255, 160, 80),
    Color32::from_rgb(120, 220, 120),
    Color32::from_rgb(220, 120, 220),
];

/// Plot view settings
#[derive(Debug, Clone)]
pub struct CurvePlot {
    /// Line width in points
    pub line_width: f32,
    /// Whether to show the grid
    pub show_grid: bool,
}

impl Default for CurvePlot {
    fn default() -> Self {
        Self {
            line_width: 1.5,
            show_grid: true,
        }
    }
}

impl CurvePlot {
    /// Render all curves of the current measurement
    pub fn render(&self, ui: &mut Ui, curves: &[PlotCurve]) {
        let (x_label, y_label) = curves
            .first()
            .map(|c| (c.info.x_unit.clone(), c.info.y_unit.clone()))
            .unwrap_or_else(|| ("Potential (V)".to_string(), "Current (µA)".to_string()));

        Plot::new("curve_plot")
            .allow_zoom(true)
            .allow_drag(true)
            .show_axes(true)
            .show_grid(self.show_grid)
            .x_axis_label(x_label)
            .y_axis_label(y_label)
            .legend(Legend::default().position(Corner::RightTop))
            .show(ui, |plot_ui| {
                for (i, curve) in curves.iter().enumerate() {
                    if curve.points.is_empty() {
                        continue;
                    }
                    let points = PlotPoints::from(curve.points.clone());
                    let line = Line::new(curve.info.title.clone(), points)
                        .color(PALETTE[i % PALETTE.len()])
                        .width(self.line_width);
                    plot_ui.line(line);
                }
            });
    }
}
