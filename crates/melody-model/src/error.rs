// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model construction and the forward pass.

use tensor_core::Shape;

/// Errors that can occur when building or running the model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The hyperparameter bundle is unusable.
    #[error("invalid hyperparameters: {0}")]
    InvalidHParams(String),

    /// A variable was re-registered under the same name with a different shape.
    #[error("variable '{name}' already registered with shape {registered}, requested {requested}")]
    VariableShapeMismatch {
        name: String,
        registered: Shape,
        requested: Shape,
    },

    /// A variable lookup failed.
    #[error("variable not found: {name}")]
    VariableNotFound { name: String },

    /// A forward-pass input does not match the model's shapes.
    #[error("invalid input for {what}: {detail}")]
    InvalidInput {
        what: &'static str,
        detail: String,
    },

    /// A tensor kernel failed.
    #[error(transparent)]
    Tensor(#[from] tensor_core::TensorError),
}
