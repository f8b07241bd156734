//! Scalar fields `f(x, y) -> z` with a bounded evaluation domain.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use meval::{Context, ContextProvider, Expr};
use thiserror::Error;

use crate::math::Vector2;

/// Step used by the central-difference gradient
const GRADIENT_EPS: f32 = 0.0005;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldError {
    #[error("input ({x}, {y}) lies outside the field domain")]
    OutOfDomain { x: f32, y: f32 },
    #[error("field produced a non-finite value at ({x}, {y})")]
    NonFinite { x: f32, y: f32 },
    #[error("invalid domain bounds: every max must exceed its min")]
    InvalidDomain,
    #[error("field name must not be empty")]
    EmptyName,
    #[error("could not parse expression: {0}")]
    Parse(String),
}

/// Evaluation domain (x, y) and display range (z) of a field
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DomainBounds {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
    pub z_min: f32,
    pub z_max: f32,
}

impl Default for DomainBounds {
    fn default() -> Self {
        DomainBounds {
            x_min: -10.0,
            x_max: 10.0,
            y_min: -10.0,
            y_max: 10.0,
            z_min: -10.0,
            z_max: 10.0,
        }
    }
}

impl DomainBounds {
    pub fn new(
        x_min: f32,
        x_max: f32,
        y_min: f32,
        y_max: f32,
        z_min: f32,
        z_max: f32,
    ) -> Result<Self, FieldError> {
        if x_max <= x_min || y_max <= y_min || z_max <= z_min {
            return Err(FieldError::InvalidDomain);
        }
        Ok(DomainBounds {
            x_min,
            x_max,
            y_min,
            y_max,
            z_min,
            z_max,
        })
    }

    pub fn contains_xy(&self, x: f32, y: f32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// Whether a height lies inside the display range
    pub fn contains_height(&self, z: f32) -> bool {
        z >= self.z_min && z <= self.z_max
    }
}

type FieldFn = dyn Fn(f32, f32) -> f32 + Send + Sync;

/// A named scalar function over a rectangular domain
#[derive(Clone)]
pub struct ScalarField {
    name: String,
    function: Arc<FieldFn>,
    bounds: DomainBounds,
}

impl fmt::Debug for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarField")
            .field("name", &self.name)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl ScalarField {
    pub fn new<F>(name: impl Into<String>, function: F) -> Result<Self, FieldError>
    where
        F: Fn(f32, f32) -> f32 + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(FieldError::EmptyName);
        }
        Ok(ScalarField {
            name,
            function: Arc::new(function),
            bounds: DomainBounds::default(),
        })
    }

    /// Parses an expression in `x` and `y`, e.g. `x^2 + sin(y)`. The expression text becomes
    /// the field name.
    pub fn from_expression(expression: &str) -> Result<Self, FieldError> {
        let trimmed = expression.trim();
        let expr = Expr::from_str(trimmed).map_err(|e| FieldError::Parse(e.to_string()))?;

        // Reject unknown variables or functions up front instead of on every sample
        let probe = expr
            .eval_with_context((XyContext { x: 0.0, y: 0.0 }, Context::new()))
            .map_err(|e| FieldError::Parse(e.to_string()))?;
        log::trace!("parsed `{trimmed}`, f(0, 0) = {probe}");

        ScalarField::new(trimmed, move |x, y| {
            let vars = XyContext {
                x: x as f64,
                y: y as f64,
            };
            expr.eval_with_context((vars, Context::new()))
                .map(|v| v as f32)
                .unwrap_or(f32::NAN)
        })
    }

    pub fn with_bounds(mut self, bounds: DomainBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> DomainBounds {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: DomainBounds) {
        self.bounds = bounds;
    }

    /// Evaluates `f(x, y)`, rejecting inputs outside the domain and non-finite results
    pub fn evaluate(&self, x: f32, y: f32) -> Result<f32, FieldError> {
        if !self.bounds.contains_xy(x, y) {
            return Err(FieldError::OutOfDomain { x, y });
        }
        let z = (self.function)(x, y);
        if !z.is_finite() {
            return Err(FieldError::NonFinite { x, y });
        }
        Ok(z)
    }

    /// Gradient by central finite differences
    pub fn gradient_at(&self, x: f32, y: f32) -> Result<Vector2, FieldError> {
        let eps = GRADIENT_EPS;
        let dfdx = (self.evaluate(x + eps, y)? - self.evaluate(x - eps, y)?) / (2.0 * eps);
        let dfdy = (self.evaluate(x, y + eps)? - self.evaluate(x, y - eps)?) / (2.0 * eps);
        Ok(Vector2::new(dfdx, dfdy))
    }
}

/// Exposes the sample coordinates to meval as the variables `x` and `y`
struct XyContext {
    x: f64,
    y: f64,
}

impl ContextProvider for XyContext {
    fn get_var(&self, name: &str) -> Option<f64> {
        match name {
            "x" => Some(self.x),
            "y" => Some(self.y),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_fields_evaluate() {
        let field = ScalarField::from_expression(" x^2 + y^2 ").unwrap();
        assert_eq!(field.name(), "x^2 + y^2");
        assert_eq!(field.evaluate(3.0, 4.0), Ok(25.0));

        let trig = ScalarField::from_expression("sin(x) * cos(y)").unwrap();
        assert!(trig.evaluate(0.0, 0.0).unwrap().abs() < 1e-6);
    }

    #[test]
    fn bad_expressions_are_rejected() {
        assert!(matches!(
            ScalarField::from_expression("(x + y"),
            Err(FieldError::Parse(_))
        ));
        assert!(matches!(
            ScalarField::from_expression("x + z"),
            Err(FieldError::Parse(_))
        ));
        assert_eq!(
            ScalarField::new("", |x, _| x).unwrap_err(),
            FieldError::EmptyName
        );
    }

    #[test]
    fn evaluation_checks_domain_and_finiteness() {
        let field = ScalarField::new("recip", |x, _| 1.0 / x).unwrap();
        assert_eq!(
            field.evaluate(11.0, 0.0),
            Err(FieldError::OutOfDomain { x: 11.0, y: 0.0 })
        );
        assert_eq!(
            field.evaluate(0.0, 0.0),
            Err(FieldError::NonFinite { x: 0.0, y: 0.0 })
        );
        assert_eq!(field.evaluate(2.0, 0.0), Ok(0.5));
    }

    #[test]
    fn gradient_of_paraboloid() {
        let field = ScalarField::new("bowl", |x, y| x * x + y * y).unwrap();
        let grad = field.gradient_at(1.0, -2.0).unwrap();
        assert!((grad.x - 2.0).abs() < 0.05, "{grad}");
        assert!((grad.y + 4.0).abs() < 0.05, "{grad}");
    }

    #[test]
    fn gradient_fails_at_domain_edge() {
        let field = ScalarField::new("plane", |x, _| x).unwrap();
        assert!(field.gradient_at(10.0, 0.0).is_err());
    }

    #[test]
    fn domain_bounds_validate_ordering() {
        assert_eq!(
            DomainBounds::new(1.0, 1.0, -1.0, 1.0, -1.0, 1.0),
            Err(FieldError::InvalidDomain)
        );
        let bounds = DomainBounds::new(-1.0, 1.0, -2.0, 2.0, -0.5, 0.5).unwrap();
        assert!(bounds.contains_xy(1.0, -2.0));
        assert!(!bounds.contains_height(0.6));
    }
}
