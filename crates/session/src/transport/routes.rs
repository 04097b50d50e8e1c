// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API paths, relative to the configured base URL.

pub const LOGIN: &str = "/auth/login";
pub const REGISTER: &str = "/auth/register";
pub const GOOGLE: &str = "/auth/google";
pub const LOGOUT: &str = "/auth/logout";
pub const LOGOUT_ALL: &str = "/auth/logout-all";
pub const ME: &str = "/auth/me";
pub const REFRESH: &str = "/auth/refresh";
pub const VERIFY_EMAIL: &str = "/auth/verify-email";
pub const RESEND_VERIFICATION: &str = "/auth/resend-verification";
pub const FORGOT_PASSWORD: &str = "/auth/forgot-password";
pub const RESET_PASSWORD: &str = "/auth/reset-password";
pub const CHANGE_PASSWORD: &str = "/auth/change-password";
pub const PROFILE: &str = "/users/me";
