// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use crate::rowfunnel_config::config as rowfunnel_app_config;

pub(crate) fn max_parallel_workers() -> usize {
    rowfunnel_app_config()
        .ok()
        .map(|c| c.runtime.max_parallel_workers)
        .unwrap_or(8)
}

pub(crate) fn tuple_queue_capacity() -> usize {
    rowfunnel_app_config()
        .ok()
        .map(|c| c.runtime.tuple_queue_capacity)
        .unwrap_or(1024)
        .max(1)
}

pub(crate) fn gather_statistics() -> bool {
    rowfunnel_app_config()
        .ok()
        .map(|c| c.runtime.gather_statistics)
        .unwrap_or(false)
}
