// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Assembly of the depth estimation networks around the recurrent core.

pub mod branch;
pub mod fusion;
pub mod model;
