// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use aprs_tracker::registry::ThresholdError;
use aprs_tracker::BridgeError;
use thiserror::Error;

/// Anything that makes the program exit with a failure status.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] confy::ConfyError),

    #[error("invalid station thresholds: {0}")]
    Threshold(#[from] ThresholdError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("cannot install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}
