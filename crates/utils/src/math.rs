// This file is part of Aiops Bundler.
//
// Aiops Bundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Aiops Bundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Aiops Bundler.
// If not, see https://www.gnu.org/licenses/.

//! Math utilities

use std::ops::{Div, Mul};

/// Increases a number by a percentage
pub fn increase_by_percent<T>(n: T, percent: u32) -> T
where
    T: Mul<Output = T> + Div<Output = T> + From<u32>,
{
    (n * T::from(100 + percent)) / T::from(100)
}

/// Take a percentage of a number
pub fn percent<T>(n: T, percent: u32) -> T
where
    T: Mul<Output = T> + Div<Output = T> + From<u32>,
{
    (n * T::from(percent)) / T::from(100)
}
