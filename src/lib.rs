/*
 * This file is part of tmuctl.
 *
 * Copyright (C) 2025 TMU tools contributors
 *
 * tmuctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tmuctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tmuctl. If not, see <https://www.gnu.org/licenses/>.
 */

//! tmuctl - client for the TMU thermal daemon
//!
//! `client` speaks the line-delimited JSON protocol over the daemon socket;
//! `output` renders responses for the terminal.

pub mod client;
pub mod output;

pub use client::DaemonClient;
